//! Reset-checkpoint command implementation.

use std::error::Error;
use std::path::Path;
use syncfeed_follower::{CheckpointStore, FileCheckpointStore};

/// Runs the reset-checkpoint command.
///
/// The next follow of `url` starts from the beginning of the feed. Run it
/// only while no follower for the URL is active.
pub fn run(url: &str, state: &Path) -> Result<(), Box<dyn Error>> {
    let url = url.trim_end_matches('/');
    let store = FileCheckpointStore::open(state)?;
    let previous = store.load(url)?.checkpoint;
    store.reset(url)?;
    println!("Checkpoint for {url} reset (was {previous})");
    Ok(())
}
