//! Change store backends.
//!
//! The change store is the table of change items keyed by
//! (collection, key), plus the per-collection log state. It is the leaf
//! dependency of the engine: the sequencer, publisher, reindexer and feed
//! server all go through this trait.

mod file;
mod memory;

pub use file::{FileChangeStore, FileStoreOptions};
pub use memory::MemoryChangeStore;

use crate::error::CoreResult;
use crate::item::{ChangeItem, ChangeLogState, ChangeWrite};

/// Storage for change items and change-log state.
///
/// Implementations must make [`commit`](ChangeStore::commit) atomic: the item
/// and the counter update land together or not at all. Callers serialize
/// writers per collection (see [`Sequencer`](crate::Sequencer)); readers may
/// run concurrently with writers.
pub trait ChangeStore: Send + Sync {
    /// Returns the log state of a collection. A collection that has never
    /// been written reads as the default state.
    fn log_state(&self, collection: &str) -> CoreResult<ChangeLogState>;

    /// Looks up the item for a key.
    fn get(&self, collection: &str, key: &str) -> CoreResult<Option<ChangeItem>>;

    /// Applies one unit of work.
    fn commit(&self, collection: &str, write: ChangeWrite) -> CoreResult<()>;

    /// Returns up to `limit` items with `sequence > since`, ascending.
    fn since(&self, collection: &str, since: u64, limit: usize) -> CoreResult<Vec<ChangeItem>>;

    /// Returns up to `limit` items with key greater than `after`, ordered by
    /// key.
    fn page_by_key(
        &self,
        collection: &str,
        after: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<ChangeItem>>;

    /// Stores the publish-settings fingerprint of a collection.
    fn set_fingerprint(&self, collection: &str, fingerprint: &str) -> CoreResult<()>;

    /// Lists the collections that have any state.
    fn collections(&self) -> CoreResult<Vec<String>>;
}
