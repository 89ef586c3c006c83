//! Turns host record commits into change-log entries.

use crate::collection::PublishedCollection;
use crate::error::{CoreError, CoreResult};
use crate::item::{validate_key, ChangeItem};
use crate::rules::PublishRules;
use crate::sequencer::Sequencer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a publish call did to the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A new key was published at this sequence.
    Created(u64),
    /// An existing key changed content at this sequence.
    Updated(u64),
    /// A key was tombstoned at this sequence.
    Deleted(u64),
    /// Nothing changed.
    Unchanged,
    /// Nothing visible changed, but a stale rebuild marker was cleared.
    Cleaned,
    /// The change was dropped (invalid key or failing hook).
    Skipped,
}

impl PublishOutcome {
    /// Returns the sequence allocated by this call, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Created(seq) | Self::Updated(seq) | Self::Deleted(seq) => Some(*seq),
            _ => None,
        }
    }

    /// Returns true if consumers will see this call.
    pub fn is_visible(&self) -> bool {
        self.sequence().is_some()
    }
}

/// Desired state of a key after a publish call.
enum Target {
    Live(ChangeItem),
    Tombstone,
}

/// Publishes host records of one collection.
///
/// Hooks run outside the collection lock; only the lookup and the single
/// store write happen inside the [`Sequencer`] section.
pub struct Publisher<R: PublishRules> {
    rules: Arc<R>,
    collection: Arc<PublishedCollection>,
}

impl<R: PublishRules> Clone for Publisher<R> {
    fn clone(&self) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
            collection: Arc::clone(&self.collection),
        }
    }
}

impl<R: PublishRules> fmt::Debug for Publisher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("collection", &self.collection.name())
            .finish()
    }
}

impl<R: PublishRules> Publisher<R> {
    /// Creates a publisher for a collection.
    pub fn new(collection: Arc<PublishedCollection>, rules: Arc<R>) -> Self {
        Self { rules, collection }
    }

    /// Returns the collection this publisher writes to.
    pub fn collection(&self) -> &Arc<PublishedCollection> {
        &self.collection
    }

    /// Returns the injected rules.
    pub fn rules(&self) -> &Arc<R> {
        &self.rules
    }

    /// Host hook: a record was committed.
    pub fn on_record_committed(&self, record: &R::Record) {
        self.publish_update(record);
    }

    /// Host hook: a record was deleted.
    pub fn on_record_deleted(&self, record: &R::Record) {
        self.publish_delete(record);
    }

    /// Publishes the current state of a record.
    ///
    /// Records failing the constraint are treated as deletions. Failures are
    /// logged and reported as [`PublishOutcome::Skipped`].
    pub fn publish_update(&self, record: &R::Record) -> PublishOutcome {
        let result = self.try_publish_update(record, true);
        self.settle(result)
    }

    /// Publishes the deletion of a record.
    pub fn publish_delete(&self, record: &R::Record) -> PublishOutcome {
        let result = self.try_publish_delete(record);
        self.settle(result)
    }

    fn settle(&self, result: CoreResult<PublishOutcome>) -> PublishOutcome {
        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_per_change() => {
                warn!(collection = self.collection.name(), error = %e, "change dropped");
                PublishOutcome::Skipped
            }
            Err(e) => {
                error!(collection = self.collection.name(), error = %e, "failed to record change");
                PublishOutcome::Skipped
            }
        }
    }

    /// Publishes a record, optionally bypassing the constraint. Errors are
    /// returned to the caller.
    pub(crate) fn try_publish_update(
        &self,
        record: &R::Record,
        check_constraint: bool,
    ) -> CoreResult<PublishOutcome> {
        if check_constraint && !self.rules.matches(&self.rules.record_id(record))? {
            return self.try_publish_delete(record);
        }

        let key = self.key_of(record)?;
        let view = self.rules.to_view(record)?;
        let snapshot = self.rules.serialize(&view)?;
        self.apply(&key, Target::Live(ChangeItem::live(key.clone(), snapshot)))
    }

    fn try_publish_delete(&self, record: &R::Record) -> CoreResult<PublishOutcome> {
        let key = self.key_of(record)?;
        self.apply(&key, Target::Tombstone)
    }

    fn key_of(&self, record: &R::Record) -> CoreResult<String> {
        let key = self
            .rules
            .key_of(record)
            .ok_or_else(|| CoreError::invalid_key(""))?;
        validate_key(&key)?;
        Ok(key)
    }

    fn apply(&self, key: &str, target: Target) -> CoreResult<PublishOutcome> {
        let mut seq = self.collection.sequencer();
        let existing = seq.lookup(key)?;

        let outcome = match (existing, target) {
            (None, Target::Tombstone) => PublishOutcome::Unchanged,
            (None, Target::Live(item)) => {
                let (item, _) = seq.publish(item)?;
                PublishOutcome::Created(item.sequence)
            }
            (Some(current), Target::Live(item)) if current.same_content(&item.etag, false) => {
                clear_marker(&mut seq, current)?
            }
            (Some(current), Target::Tombstone) if current.deleted => {
                clear_marker(&mut seq, current)?
            }
            (Some(_), Target::Live(item)) => {
                let (item, _) = seq.publish(item)?;
                PublishOutcome::Updated(item.sequence)
            }
            (Some(current), Target::Tombstone) => {
                let (item, _) = seq.publish(current.into_tombstone())?;
                PublishOutcome::Deleted(item.sequence)
            }
        };
        debug!(collection = self.collection.name(), key, ?outcome, "publish");
        Ok(outcome)
    }
}

fn clear_marker(seq: &mut Sequencer<'_>, mut current: ChangeItem) -> CoreResult<PublishOutcome> {
    if !current.dirty {
        return Ok(PublishOutcome::Unchanged);
    }
    current.dirty = false;
    seq.record_housekeeping(current)?;
    Ok(PublishOutcome::Cleaned)
}
