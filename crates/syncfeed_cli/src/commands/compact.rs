//! Compact command implementation.

use std::error::Error;
use std::path::Path;
use syncfeed_core::{FileChangeStore, FileStoreOptions};

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn Error>> {
    let store = FileChangeStore::open(path, FileStoreOptions::default().with_create_if_missing(false))?;

    println!("Compacting change store at {:?}", path);
    let before = store.journal_len()?;
    store.compact()?;
    let after = store.journal_len()?;

    println!("  Size before: {} bytes", before);
    println!("  Size after:  {} bytes", after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        before.saturating_sub(after),
        if before > 0 {
            (before.saturating_sub(after) as f64 / before as f64) * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}
