//! In-memory change store.

use super::ChangeStore;
use crate::error::{CoreError, CoreResult};
use crate::item::{ChangeItem, ChangeLogState, ChangeWrite};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Rows and log state of one collection.
#[derive(Debug, Default, Clone)]
pub(crate) struct CollectionTable {
    pub(crate) state: ChangeLogState,
    /// Items by key.
    pub(crate) items: BTreeMap<String, ChangeItem>,
    /// Sequence -> key index. Holds only the latest sequence of each key.
    by_sequence: BTreeMap<u64, String>,
}

impl CollectionTable {
    /// Rejects a sequenced write whose counter does not move forward.
    pub(crate) fn check(&self, collection: &str, counter: Option<u64>) -> CoreResult<()> {
        match counter {
            Some(counter) if counter <= self.state.sequence_counter => {
                Err(CoreError::StaleSequence {
                    collection: collection.to_string(),
                    counter,
                    current: self.state.sequence_counter,
                })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn apply(&mut self, write: ChangeWrite) {
        if let Some(counter) = write.sequence_counter {
            self.state.sequence_counter = counter;
        }

        let item = write.item;
        if let Some(previous) = self.items.get(&item.key) {
            if previous.sequence != item.sequence {
                self.by_sequence.remove(&previous.sequence);
            }
        }
        self.by_sequence.insert(item.sequence, item.key.clone());
        self.items.insert(item.key.clone(), item);
    }

    fn since(&self, since: u64, limit: usize) -> Vec<ChangeItem> {
        self.by_sequence
            .range((Bound::Excluded(since), Bound::Unbounded))
            .take(limit)
            .filter_map(|(_, key)| self.items.get(key).cloned())
            .collect()
    }

    fn page_by_key(&self, after: Option<&str>, limit: usize) -> Vec<ChangeItem> {
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        self.items
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

/// All collections of a store.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) collections: HashMap<String, CollectionTable>,
}

impl Tables {
    pub(crate) fn table_mut(&mut self, collection: &str) -> &mut CollectionTable {
        self.collections.entry(collection.to_string()).or_default()
    }

    pub(crate) fn log_state(&self, collection: &str) -> ChangeLogState {
        self.collections
            .get(collection)
            .map(|t| t.state.clone())
            .unwrap_or_default()
    }

    pub(crate) fn get(&self, collection: &str, key: &str) -> Option<ChangeItem> {
        self.collections
            .get(collection)
            .and_then(|t| t.items.get(key).cloned())
    }

    pub(crate) fn since(&self, collection: &str, since: u64, limit: usize) -> Vec<ChangeItem> {
        self.collections
            .get(collection)
            .map(|t| t.since(since, limit))
            .unwrap_or_default()
    }

    pub(crate) fn page_by_key(
        &self,
        collection: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Vec<ChangeItem> {
        self.collections
            .get(collection)
            .map(|t| t.page_by_key(after, limit))
            .unwrap_or_default()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A change store that keeps everything in memory.
///
/// Suitable for tests and for hosts that rebuild the log on every start.
///
/// # Example
///
/// ```
/// use syncfeed_core::{ChangeItem, ChangeStore, ChangeWrite, MemoryChangeStore};
///
/// let store = MemoryChangeStore::new();
/// let mut item = ChangeItem::live("A", b"{}".to_vec());
/// item.sequence = 1;
/// store.commit("items", ChangeWrite::sequenced(item)).unwrap();
///
/// assert_eq!(store.log_state("items").unwrap().sequence_counter, 1);
/// assert_eq!(store.since("items", 0, 10).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    tables: RwLock<Tables>,
}

impl MemoryChangeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeStore for MemoryChangeStore {
    fn log_state(&self, collection: &str) -> CoreResult<ChangeLogState> {
        Ok(self.tables.read().log_state(collection))
    }

    fn get(&self, collection: &str, key: &str) -> CoreResult<Option<ChangeItem>> {
        Ok(self.tables.read().get(collection, key))
    }

    fn commit(&self, collection: &str, write: ChangeWrite) -> CoreResult<()> {
        let mut tables = self.tables.write();
        let table = tables.table_mut(collection);
        table.check(collection, write.sequence_counter)?;
        table.apply(write);
        Ok(())
    }

    fn since(&self, collection: &str, since: u64, limit: usize) -> CoreResult<Vec<ChangeItem>> {
        Ok(self.tables.read().since(collection, since, limit))
    }

    fn page_by_key(
        &self,
        collection: &str,
        after: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<ChangeItem>> {
        Ok(self.tables.read().page_by_key(collection, after, limit))
    }

    fn set_fingerprint(&self, collection: &str, fingerprint: &str) -> CoreResult<()> {
        self.tables.write().table_mut(collection).state.config_fingerprint =
            Some(fingerprint.to_string());
        Ok(())
    }

    fn collections(&self) -> CoreResult<Vec<String>> {
        Ok(self.tables.read().names())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, sequence: u64) -> ChangeItem {
        let mut item = ChangeItem::live(key, format!("{{\"k\":\"{key}\"}}").into_bytes());
        item.sequence = sequence;
        item
    }

    #[test]
    fn fresh_collection_reads_default() {
        let store = MemoryChangeStore::new();
        let state = store.log_state("nothing").unwrap();
        assert_eq!(state.sequence_counter, 0);
        assert!(state.config_fingerprint.is_none());
        assert!(store.since("nothing", 0, 10).unwrap().is_empty());
        assert!(store.collections().unwrap().is_empty());
    }

    #[test]
    fn update_moves_item_in_sequence_index() {
        let store = MemoryChangeStore::new();
        store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
        store.commit("c", ChangeWrite::sequenced(item("B", 2))).unwrap();
        store.commit("c", ChangeWrite::sequenced(item("A", 3))).unwrap();

        let all = store.since("c", 0, 10).unwrap();
        let seqs: Vec<_> = all.iter().map(|i| (i.key.as_str(), i.sequence)).collect();
        assert_eq!(seqs, vec![("B", 2), ("A", 3)]);
        assert_eq!(store.log_state("c").unwrap().sequence_counter, 3);
    }

    #[test]
    fn since_is_strict_and_limited() {
        let store = MemoryChangeStore::new();
        for (i, key) in ["A", "B", "C", "D"].iter().enumerate() {
            store
                .commit("c", ChangeWrite::sequenced(item(key, i as u64 + 1)))
                .unwrap();
        }
        let page = store.since("c", 1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sequence, 2);
        assert_eq!(page[1].sequence, 3);
        assert!(store.since("c", 4, 10).unwrap().is_empty());
        assert!(store.since("c", u64::MAX, 10).unwrap().is_empty());
    }

    #[test]
    fn stale_sequence_is_rejected() {
        let store = MemoryChangeStore::new();
        store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();
        let err = store
            .commit("c", ChangeWrite::sequenced(item("B", 1)))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::StaleSequence {
                counter: 1,
                current: 1,
                ..
            }
        ));

        let keys: Vec<_> = store
            .since("c", 0, 10)
            .unwrap()
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(keys, ["A"]);
    }

    #[test]
    fn housekeeping_keeps_counter() {
        let store = MemoryChangeStore::new();
        store.commit("c", ChangeWrite::sequenced(item("A", 1))).unwrap();

        let mut dirty = store.get("c", "A").unwrap().unwrap();
        dirty.dirty = true;
        store.commit("c", ChangeWrite::housekeeping(dirty)).unwrap();

        assert!(store.get("c", "A").unwrap().unwrap().dirty);
        assert_eq!(store.log_state("c").unwrap().sequence_counter, 1);
        assert_eq!(store.since("c", 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn key_pages() {
        let store = MemoryChangeStore::new();
        for (i, key) in ["d", "a", "c", "b"].iter().enumerate() {
            store
                .commit("c", ChangeWrite::sequenced(item(key, i as u64 + 1)))
                .unwrap();
        }
        let first = store.page_by_key("c", None, 2).unwrap();
        assert_eq!(first[0].key, "a");
        assert_eq!(first[1].key, "b");
        let second = store.page_by_key("c", Some("b"), 2).unwrap();
        assert_eq!(second[0].key, "c");
        assert_eq!(second[1].key, "d");
        assert!(store.page_by_key("c", Some("d"), 2).unwrap().is_empty());
    }

    #[test]
    fn collections_are_isolated() {
        let store = MemoryChangeStore::new();
        store.commit("x", ChangeWrite::sequenced(item("A", 1))).unwrap();
        store.commit("y", ChangeWrite::sequenced(item("A", 1))).unwrap();
        store.set_fingerprint("y", "fp").unwrap();

        assert_eq!(store.collections().unwrap(), vec!["x", "y"]);
        assert!(store.log_state("x").unwrap().config_fingerprint.is_none());
        assert_eq!(
            store.log_state("y").unwrap().config_fingerprint.as_deref(),
            Some("fp")
        );
    }
}
