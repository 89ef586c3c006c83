//! Serve command implementation.

use crate::rules::{is_deletion, JsonRecordRules};
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use syncfeed_core::{
    CollectionRegistry, CoreConfig, FileChangeStore, FileStoreOptions, PublishOutcome, Publisher,
    Reindexer,
};
use syncfeed_server::{FeedServer, ServerConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Options for the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Change store directory.
    pub store: PathBuf,
    /// Collection to publish.
    pub collection: String,
    /// JSON array or NDJSON file with the collection's records.
    pub source: Option<PathBuf>,
    /// Field holding each record's key.
    pub key_field: String,
    /// Publish only records whose field is `true`.
    pub filter: Option<String>,
    /// Listen address.
    pub bind: SocketAddr,
    /// Base URL advertised in record URLs.
    pub base_url: Option<String>,
}

/// Tally of publish outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishTally {
    /// Changes that consumed a sequence.
    pub changed: usize,
    /// Records already up to date.
    pub unchanged: usize,
    /// Records dropped (bad key, unreadable line).
    pub skipped: usize,
}

impl PublishTally {
    fn record(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Created(_) | PublishOutcome::Updated(_) | PublishOutcome::Deleted(_) => {
                self.changed += 1
            }
            PublishOutcome::Unchanged | PublishOutcome::Cleaned => self.unchanged += 1,
            PublishOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Runs the serve command.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileChangeStore::open(
        &options.store,
        FileStoreOptions::default(),
    )?);
    let registry = Arc::new(CollectionRegistry::new(store));
    let collection = registry.enable(&options.collection);

    let mut rules = JsonRecordRules::new(&options.collection, &options.key_field);
    if let Some(field) = &options.filter {
        rules = rules.with_filter(field);
    }
    let rules = Arc::new(rules);
    let publisher = Publisher::new(collection, Arc::clone(&rules));

    let records = match &options.source {
        Some(path) => load_source(path)?,
        None => Vec::new(),
    };
    for record in &records {
        if rules.upsert(record.clone()).is_none() {
            warn!(field = %options.key_field, "source record without a key ignored");
        }
    }
    if let Some(path) = &options.source {
        if rules.is_empty() {
            warn!(source = %path.display(), "source holds no keyed records");
        } else {
            info!(source = %path.display(), records = rules.len(), "source loaded");
        }
    }

    let reindexer = Reindexer::new(publisher.clone(), &CoreConfig::default());
    match reindexer.ensure_current()? {
        Some(report) => info!(
            collection = %options.collection,
            republished = report.republished,
            confirmed = report.confirmed,
            tombstoned = report.tombstoned,
            "publish settings changed, log rebuilt"
        ),
        None => {
            let mut tally = PublishTally::default();
            for record in &records {
                tally.record(publisher.publish_update(record));
            }
            info!(
                collection = %options.collection,
                changed = tally.changed,
                unchanged = tally.unchanged,
                skipped = tally.skipped,
                "source published"
            );
        }
    }

    let feeder = publisher.clone();
    thread::Builder::new()
        .name("syncfeed-stdin".into())
        .spawn(move || {
            let tally = publish_lines(io::stdin().lock(), &feeder);
            info!(
                changed = tally.changed,
                unchanged = tally.unchanged,
                skipped = tally.skipped,
                "stdin closed"
            );
        })?;

    let mut config = ServerConfig::new(options.bind);
    if let Some(url) = options.base_url {
        config = config.with_public_base_url(url);
    }
    let server = FeedServer::new(registry, config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = TcpListener::bind(options.bind).await?;
        server
            .serve_with_shutdown(listener, super::ctrl_c())
            .await?;
        Ok::<_, Box<dyn Error>>(())
    })?;

    info!("server stopped");
    Ok(())
}

/// Reads records from a JSON array or NDJSON file.
pub fn load_source(path: &Path) -> Result<Vec<Value>, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&text)?);
    }
    let mut records = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line)
            .map_err(|e| format!("{}:{}: {e}", path.display(), number + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// Publishes one NDJSON record per line until the input ends.
///
/// A record with `"_deleted": true` deletes its key.
pub fn publish_lines<B: BufRead>(input: B, publisher: &Publisher<JsonRecordRules>) -> PublishTally {
    let rules = publisher.rules();
    let mut tally = PublishTally::default();

    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "input read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "unreadable input line skipped");
                tally.skipped += 1;
                continue;
            }
        };

        let outcome = if is_deletion(&record) {
            if let Some(key) = rules.key_for(&record) {
                rules.remove(&key);
            }
            publisher.publish_delete(&record)
        } else {
            rules.upsert(record.clone());
            publisher.publish_update(&record)
        };
        tally.record(outcome);
    }
    tally
}
