//! The per-collection single-writer section.
//!
//! A [`Sequencer`] holds the collection's write lock for as long as it lives.
//! Sequence numbers can only be obtained through it, and the counter is
//! persisted in the same store write as the item that consumes it. If that
//! write fails the counter does not move, so the failed number was never
//! visible to anyone.

use crate::collection::PublishedCollection;
use crate::error::CoreResult;
use crate::item::{ChangeItem, ChangeWrite};
use crate::subscriber::{ChangeSink, FanOut, SubscriberId};
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::trace;

/// Exclusive write access to one collection's change log.
///
/// Obtained from [`PublishedCollection::sequencer`]. Dropping it releases the
/// collection lock.
pub struct Sequencer<'a> {
    collection: &'a PublishedCollection,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Sequencer<'a> {
    pub(crate) fn new(collection: &'a PublishedCollection, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            collection,
            _guard: guard,
        }
    }

    /// Returns the collection name.
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Returns the sequence the next recorded change will get.
    pub fn next_sequence(&self) -> CoreResult<u64> {
        let state = self.collection.store().log_state(self.collection.name())?;
        Ok(state.sequence_counter + 1)
    }

    /// Looks up the current item for a key.
    pub fn lookup(&self, key: &str) -> CoreResult<Option<ChangeItem>> {
        self.collection.store().get(self.collection.name(), key)
    }

    /// Returns up to `limit` items after `since` while holding the lock.
    pub fn catch_up(&self, since: u64, limit: usize) -> CoreResult<Vec<ChangeItem>> {
        self.collection
            .store()
            .since(self.collection.name(), since, limit)
    }

    /// Assigns the next sequence to `item` and stores item and counter as one
    /// unit of work. Does not fan out.
    pub fn record_change(&mut self, mut item: ChangeItem) -> CoreResult<ChangeItem> {
        item.sequence = self.next_sequence()?;
        item.dirty = false;
        self.collection
            .store()
            .commit(self.collection.name(), ChangeWrite::sequenced(item.clone()))?;
        trace!(collection = self.collection.name(), key = %item.key, seq = item.sequence, "recorded change");
        Ok(item)
    }

    /// Records a change and offers it to every live subscriber.
    pub fn publish(&mut self, item: ChangeItem) -> CoreResult<(ChangeItem, FanOut)> {
        let item = self.record_change(item)?;
        let fan_out = self
            .collection
            .subscribers()
            .fan_out(self.collection.name(), &item);
        Ok((item, fan_out))
    }

    /// Stores an item without consuming a sequence (dirty-flag maintenance).
    pub fn record_housekeeping(&mut self, item: ChangeItem) -> CoreResult<()> {
        self.collection
            .store()
            .commit(self.collection.name(), ChangeWrite::housekeeping(item))
    }

    /// Stores the publish-settings fingerprint of the collection.
    pub fn record_fingerprint(&mut self, fingerprint: &str) -> CoreResult<()> {
        self.collection
            .store()
            .set_fingerprint(self.collection.name(), fingerprint)
    }

    /// Registers a live subscriber.
    ///
    /// Because this happens inside the write section, no change can be
    /// recorded between a caller's last [`catch_up`](Self::catch_up) and the
    /// moment the sink starts receiving fan-out.
    pub fn register(&mut self, sink: Arc<dyn ChangeSink>) -> SubscriberId {
        self.collection.subscribers().insert(sink)
    }
}
