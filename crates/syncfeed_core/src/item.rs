//! Change log rows and per-collection log state.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum length of a published key, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// One row of a collection's change log.
///
/// There is exactly one item per (collection, key). It is updated in place on
/// every material change and never removed; deletions leave a tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeItem {
    /// Stable business key.
    pub key: String,
    /// Sequence of the latest material change to this key.
    pub sequence: u64,
    /// Content hash of `snapshot` (kept from the last live version on
    /// tombstones).
    pub etag: String,
    /// Serialized view, empty for tombstones.
    #[serde(default)]
    pub snapshot: Vec<u8>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Set during a rebuild until the row is confirmed or swept.
    #[serde(default)]
    pub dirty: bool,
}

impl ChangeItem {
    /// Creates a live item. The sequence is assigned when it is recorded.
    pub fn live(key: impl Into<String>, snapshot: Vec<u8>) -> Self {
        let etag = compute_etag(&snapshot);
        Self {
            key: key.into(),
            sequence: 0,
            etag,
            snapshot,
            deleted: false,
            dirty: false,
        }
    }

    /// Turns this item into a tombstone, keeping its etag.
    pub fn into_tombstone(mut self) -> Self {
        self.deleted = true;
        self.snapshot = Vec::new();
        self.dirty = false;
        self
    }

    /// Returns true if `other` describes the same published content.
    pub fn same_content(&self, etag: &str, deleted: bool) -> bool {
        self.etag == etag && self.deleted == deleted
    }

    /// Decodes the snapshot as JSON. Tombstones yield `None`.
    pub fn view(&self) -> CoreResult<Option<serde_json::Value>> {
        if self.deleted {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.snapshot)?))
    }
}

/// Per-collection log metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogState {
    /// Highest sequence handed out so far (0 for a fresh log).
    pub sequence_counter: u64,
    /// Fingerprint of the publish settings the log was built with.
    pub config_fingerprint: Option<String>,
}

/// A single unit of work against the change store.
///
/// The item and the optional counter update are applied together or not at
/// all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeWrite {
    /// New value of the sequence counter, if this write consumes a sequence.
    pub sequence_counter: Option<u64>,
    /// The row to store.
    pub item: ChangeItem,
}

impl ChangeWrite {
    /// A write that consumes `item.sequence`.
    pub fn sequenced(item: ChangeItem) -> Self {
        Self {
            sequence_counter: Some(item.sequence),
            item,
        }
    }

    /// A write that leaves the counter alone (dirty-flag maintenance).
    pub fn housekeeping(item: ChangeItem) -> Self {
        Self {
            sequence_counter: None,
            item,
        }
    }
}

/// Computes the etag of a serialized view (sha-256, lowercase hex).
pub fn compute_etag(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Returns true if `key` may be published.
///
/// Keys are 1 to 255 bytes of `[A-Za-z0-9._~:@-]`, so they can be embedded in
/// a URL path without escaping.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b':' | b'@' | b'-'))
}

/// Validates a key, returning `InvalidKey` on failure.
pub fn validate_key(key: &str) -> CoreResult<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(CoreError::invalid_key(key))
    }
}
