//! Published collections and the registry that owns them.

use crate::error::{CoreError, CoreResult};
use crate::item::{ChangeItem, ChangeLogState};
use crate::sequencer::Sequencer;
use crate::store::ChangeStore;
use crate::subscriber::SubscriberSet;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// A collection with change tracking enabled.
///
/// Bundles the collection's write lock, its live subscribers and its
/// rebuild flag. The change log itself lives in the shared store.
pub struct PublishedCollection {
    name: String,
    store: Arc<dyn ChangeStore>,
    write_lock: Mutex<()>,
    subscribers: SubscriberSet,
    rebuilding: AtomicBool,
}

impl PublishedCollection {
    /// Creates a collection handle over a store.
    pub fn new(name: impl Into<String>, store: Arc<dyn ChangeStore>) -> Self {
        Self {
            name: name.into(),
            store,
            write_lock: Mutex::new(()),
            subscribers: SubscriberSet::new(),
            rebuilding: AtomicBool::new(false),
        }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn ChangeStore> {
        &self.store
    }

    /// Returns the live subscribers.
    pub fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    /// Enters the collection's write section. Blocks until it is free.
    pub fn sequencer(&self) -> Sequencer<'_> {
        Sequencer::new(self, self.write_lock.lock())
    }

    /// Returns the collection's log state.
    pub fn log_state(&self) -> CoreResult<ChangeLogState> {
        self.store.log_state(&self.name)
    }

    /// Returns up to `limit` items after `since`, without taking the lock.
    pub fn since(&self, since: u64, limit: usize) -> CoreResult<Vec<ChangeItem>> {
        self.store.since(&self.name, since, limit)
    }

    /// Looks up a single item, without taking the lock.
    pub fn get(&self, key: &str) -> CoreResult<Option<ChangeItem>> {
        self.store.get(&self.name, key)
    }

    /// Returns true while a rebuild is running.
    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_rebuild(&self) -> CoreResult<RebuildGuard<'_>> {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::AlreadyRebuilding {
                collection: self.name.clone(),
            });
        }
        Ok(RebuildGuard {
            flag: &self.rebuilding,
        })
    }
}

impl fmt::Debug for PublishedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishedCollection")
            .field("name", &self.name)
            .field("subscribers", &self.subscribers.len())
            .field("rebuilding", &self.is_rebuilding())
            .finish()
    }
}

/// Clears the rebuild flag when dropped.
pub(crate) struct RebuildGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Registry of change-tracked collections, indexed by name.
///
/// Owned by whoever serves the collections (normally the feed server); there
/// is no global registry.
pub struct CollectionRegistry {
    store: Arc<dyn ChangeStore>,
    collections: RwLock<HashMap<String, Arc<PublishedCollection>>>,
}

impl CollectionRegistry {
    /// Creates an empty registry over a store.
    pub fn new(store: Arc<dyn ChangeStore>) -> Self {
        Self {
            store,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<dyn ChangeStore> {
        &self.store
    }

    /// Enables change tracking for a collection. Idempotent.
    pub fn enable(&self, name: &str) -> Arc<PublishedCollection> {
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Arc::clone(existing);
        }
        let collection = Arc::new(PublishedCollection::new(name, Arc::clone(&self.store)));
        collections.insert(name.to_string(), Arc::clone(&collection));
        info!(collection = name, "change tracking enabled");
        collection
    }

    /// Returns a collection if change tracking is enabled for it.
    pub fn get(&self, name: &str) -> Option<Arc<PublishedCollection>> {
        self.collections.read().get(name).cloned()
    }

    /// Like [`get`](Self::get) but returns `NotEnabled` for unknown names.
    pub fn require(&self, name: &str) -> CoreResult<Arc<PublishedCollection>> {
        self.get(name).ok_or_else(|| CoreError::not_enabled(name))
    }

    /// Returns the names of all enabled collections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("collections", &self.names())
            .finish()
    }
}
