//! Rebuilding a collection's change log after its publish settings change.
//!
//! A rebuild marks every row dirty, republishes every matching record (which
//! clears the marker on rows that are still published), then tombstones
//! whatever is still dirty. A record whose key or hooks fail is skipped like
//! any other dropped change. Each batch runs in its own write section so
//! ordinary publishers keep making progress. If a pass fails the markers stay
//! in place and the whole rebuild can simply run again.

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::publisher::{PublishOutcome, Publisher};
use crate::rules::PublishRules;
use tracing::{info, warn};

/// Counters collected during a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Rows marked dirty in the first pass.
    pub marked: usize,
    /// Records whose content changed (or that appeared) during republish.
    pub republished: usize,
    /// Records that were already up to date.
    pub confirmed: usize,
    /// Records dropped for an invalid key or a failing hook. Their rows are
    /// left to the sweep.
    pub skipped: usize,
    /// Live rows tombstoned by the sweep.
    pub tombstoned: usize,
    /// Tombstones whose marker was cleared by the sweep.
    pub cleared: usize,
    /// Fingerprint stored at the end.
    pub fingerprint: String,
}

/// Rebuilds one collection.
pub struct Reindexer<R: PublishRules> {
    publisher: Publisher<R>,
    batch_size: usize,
}

impl<R: PublishRules> Reindexer<R> {
    /// Creates a reindexer for the publisher's collection.
    pub fn new(publisher: Publisher<R>, config: &CoreConfig) -> Self {
        Self {
            publisher,
            batch_size: config.reindex_batch_size.max(1),
        }
    }

    /// Returns true if the stored fingerprint differs from the current
    /// settings (or none is stored yet).
    pub fn needs_rebuild(&self) -> CoreResult<bool> {
        let current = self.publisher.rules().settings().fingerprint();
        let state = self.publisher.collection().log_state()?;
        Ok(state.config_fingerprint.as_deref() != Some(current.as_str()))
    }

    /// Rebuilds only if the fingerprint changed.
    pub fn ensure_current(&self) -> CoreResult<Option<ReindexReport>> {
        if self.needs_rebuild()? {
            self.rebuild().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Runs a full rebuild.
    pub fn rebuild(&self) -> CoreResult<ReindexReport> {
        let collection = self.publisher.collection();
        let _guard = collection.begin_rebuild()?;
        let fingerprint = self.publisher.rules().settings().fingerprint();
        info!(collection = collection.name(), %fingerprint, "rebuild started");

        let mut report = ReindexReport::default();
        self.mark(&mut report)?;
        self.republish(&mut report)?;
        self.sweep(&mut report)?;

        collection.sequencer().record_fingerprint(&fingerprint)?;
        report.fingerprint = fingerprint;
        info!(
            collection = collection.name(),
            marked = report.marked,
            republished = report.republished,
            tombstoned = report.tombstoned,
            "rebuild finished"
        );
        Ok(report)
    }

    fn mark(&self, report: &mut ReindexReport) -> CoreResult<()> {
        self.for_each_page(|seq, key| {
            if let Some(mut current) = seq.lookup(key)? {
                if !current.dirty {
                    current.dirty = true;
                    seq.record_housekeeping(current)?;
                    report.marked += 1;
                }
            }
            Ok(())
        })
    }

    fn republish(&self, report: &mut ReindexReport) -> CoreResult<()> {
        let collection = self.publisher.collection().name().to_string();
        self.publisher
            .rules()
            .for_each_matching(self.batch_size, &mut |records| {
                for record in records {
                    match self.publisher.try_publish_update(&record, false) {
                        Ok(PublishOutcome::Created(_) | PublishOutcome::Updated(_)) => {
                            report.republished += 1
                        }
                        Ok(_) => report.confirmed += 1,
                        Err(e) if e.is_per_change() => {
                            warn!(collection = %collection, error = %e, "skipping record");
                            report.skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            })
    }

    fn sweep(&self, report: &mut ReindexReport) -> CoreResult<()> {
        self.for_each_page(|seq, key| {
            let Some(mut current) = seq.lookup(key)? else {
                return Ok(());
            };
            if !current.dirty {
                return Ok(());
            }
            if current.deleted {
                current.dirty = false;
                seq.record_housekeeping(current)?;
                report.cleared += 1;
            } else {
                seq.publish(current.into_tombstone())?;
                report.tombstoned += 1;
            }
            Ok(())
        })
    }

    /// Walks the log by key, one page per write section. Rows are re-read
    /// inside the section so concurrent publishes are never overwritten.
    fn for_each_page<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&mut crate::Sequencer<'_>, &str) -> CoreResult<()>,
    {
        let collection = self.publisher.collection();
        let mut after: Option<String> = None;
        loop {
            let page = collection
                .store()
                .page_by_key(collection.name(), after.as_deref(), self.batch_size)?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            after = Some(last.key.clone());

            let mut seq = collection.sequencer();
            for item in &page {
                f(&mut seq, &item.key)?;
            }
        }
    }
}
