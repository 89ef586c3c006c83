//! Inspect command implementation.

use serde::Serialize;
use std::error::Error;
use std::path::Path;
use syncfeed_core::{ChangeStore, CoreResult, FileChangeStore, FileStoreOptions};

const SCAN_BATCH: usize = 500;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Per-collection statistics.
    pub collections: Vec<CollectionReport>,
}

/// Statistics for one collection's change log.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    /// Collection name.
    pub name: String,
    /// Highest sequence handed out.
    pub sequence_counter: u64,
    /// Fingerprint of the settings the log was built with.
    pub config_fingerprint: Option<String>,
    /// Live items.
    pub live: usize,
    /// Tombstones.
    pub tombstones: usize,
    /// Items still marked by an unfinished rebuild.
    pub dirty: usize,
    /// Changes after the requested sequence, if one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<ChangeSummary>>,
}

/// One change in the listing.
#[derive(Debug, Serialize)]
pub struct ChangeSummary {
    /// Item key.
    pub key: String,
    /// Sequence of the change.
    pub seq: u64,
    /// Content hash.
    pub etag: String,
    /// Tombstone flag.
    pub deleted: bool,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    collection: Option<&str>,
    since: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("No change store found at {:?}", path).into());
    }
    let store = FileChangeStore::open(path, FileStoreOptions::default().with_create_if_missing(false))?;

    let names = match collection {
        Some(name) => vec![name.to_string()],
        None => store.collections()?,
    };
    let mut result = InspectResult {
        path: path.display().to_string(),
        journal_bytes: store.journal_len()?,
        collections: Vec::with_capacity(names.len()),
    };
    for name in &names {
        result.collections.push(scan(&store, name, since)?);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Walks one collection's log in sequence order.
pub fn scan(store: &dyn ChangeStore, name: &str, since: Option<u64>) -> CoreResult<CollectionReport> {
    let state = store.log_state(name)?;
    let mut report = CollectionReport {
        name: name.to_string(),
        sequence_counter: state.sequence_counter,
        config_fingerprint: state.config_fingerprint,
        live: 0,
        tombstones: 0,
        dirty: 0,
        changes: since.map(|_| Vec::new()),
    };

    let mut cursor = 0;
    loop {
        let batch = store.since(name, cursor, SCAN_BATCH)?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = last.sequence;
        for item in batch {
            if item.deleted {
                report.tombstones += 1;
            } else {
                report.live += 1;
            }
            if item.dirty {
                report.dirty += 1;
            }
            if let (Some(changes), Some(since)) = (report.changes.as_mut(), since) {
                if item.sequence > since {
                    changes.push(ChangeSummary {
                        key: item.key,
                        seq: item.sequence,
                        etag: item.etag,
                        deleted: item.deleted,
                    });
                }
            }
        }
    }
    Ok(report)
}

fn print_text_output(result: &InspectResult) {
    println!("Change store: {}", result.path);
    println!("  Journal: {} bytes", result.journal_bytes);
    if result.collections.is_empty() {
        println!("  (no collections)");
    }
    for collection in &result.collections {
        println!();
        println!("Collection {}:", collection.name);
        println!("  Sequence:    {}", collection.sequence_counter);
        println!(
            "  Fingerprint: {}",
            collection.config_fingerprint.as_deref().unwrap_or("(none)")
        );
        println!("  Live:        {}", collection.live);
        println!("  Tombstones:  {}", collection.tombstones);
        if collection.dirty > 0 {
            println!("  Dirty:       {} (rebuild incomplete)", collection.dirty);
        }
        if let Some(changes) = &collection.changes {
            println!("  Changes:");
            for change in changes {
                let marker = if change.deleted { " (deleted)" } else { "" };
                println!("    {:>8}  {}  {}{}", change.seq, change.etag, change.key, marker);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncfeed_core::{ChangeItem, ChangeWrite, MemoryChangeStore};

    fn commit(store: &MemoryChangeStore, key: &str, seq: u64, deleted: bool, dirty: bool) {
        let mut item = ChangeItem::live(key, b"{}".to_vec());
        if deleted {
            item = item.into_tombstone();
        }
        item.sequence = seq;
        item.dirty = dirty;
        store.commit("products", ChangeWrite::sequenced(item)).unwrap();
    }

    #[test]
    fn counts_items_and_lists_changes() {
        let store = MemoryChangeStore::new();
        commit(&store, "A", 1, false, false);
        commit(&store, "B", 2, true, false);
        commit(&store, "C", 3, false, true);
        store.set_fingerprint("products", "fp").unwrap();

        let report = scan(&store, "products", None).unwrap();
        assert_eq!(report.sequence_counter, 3);
        assert_eq!(report.config_fingerprint.as_deref(), Some("fp"));
        assert_eq!((report.live, report.tombstones, report.dirty), (2, 1, 1));
        assert!(report.changes.is_none());

        let report = scan(&store, "products", Some(1)).unwrap();
        let keys: Vec<_> = report
            .changes
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();
        assert_eq!(keys, ["B", "C"]);
    }
}
