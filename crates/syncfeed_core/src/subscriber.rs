//! Live subscriber registry and fan-out.
//!
//! Each open feed connection registers a [`ChangeSink`]. The publisher offers
//! every recorded change to every sink without blocking; a sink that cannot
//! take it (queue full, receiver gone) is removed from the set. Removal only
//! drops the set's reference, so a fan-out that already cloned the sink can
//! finish safely.

use crate::item::ChangeItem;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of offering a change to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The change was queued.
    Delivered,
    /// The sink's queue is full; the subscriber must be dropped.
    Overflowed,
    /// The receiving side is gone.
    Closed,
}

/// Receiving end of a fan-out.
///
/// `offer` is called while the collection's write section is held and must
/// never block.
pub trait ChangeSink: Send + Sync {
    /// Offers a change to the subscriber.
    fn offer(&self, item: &ChangeItem) -> Delivery;
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Sinks that accepted the change.
    pub delivered: usize,
    /// Sinks removed because they overflowed or closed.
    pub dropped: usize,
}

/// The set of live subscribers of one collection.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn ChangeSink>>>,
}

impl SubscriberSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink. Registration that must not race with publication goes
    /// through [`Sequencer::register`](crate::Sequencer::register).
    pub(crate) fn insert(&self, sink: Arc<dyn ChangeSink>) -> SubscriberId {
        let id = SubscriberId::new();
        self.subscribers.write().insert(id, sink);
        id
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Returns true if the subscriber is registered.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    /// Returns the number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns true if there are no live subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Offers a change to every subscriber, dropping the ones that fail.
    pub fn fan_out(&self, collection: &str, item: &ChangeItem) -> FanOut {
        let snapshot: Vec<(SubscriberId, Arc<dyn ChangeSink>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut result = FanOut::default();
        let mut failed = Vec::new();
        for (id, sink) in snapshot {
            match sink.offer(item) {
                Delivery::Delivered => result.delivered += 1,
                Delivery::Overflowed => {
                    warn!(collection, subscriber = %id, seq = item.sequence, "subscriber queue full, disconnecting");
                    failed.push(id);
                }
                Delivery::Closed => {
                    debug!(collection, subscriber = %id, "subscriber gone");
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &failed {
                subscribers.remove(id);
            }
            result.dropped = failed.len();
        }
        result
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}
