//! The change record served by the list and feed endpoints.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a collection's change log as seen on the wire.
///
/// `data` carries the published view and is absent for tombstones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Stable business key of the record.
    pub key: String,
    /// Canonical URL of the record.
    pub url: String,
    /// Sequence number of this change within its collection.
    pub seq: u64,
    /// Content hash of the published view.
    pub etag: String,
    /// Whether the record was deleted.
    #[serde(default)]
    pub deleted: bool,
    /// Published view (omitted for tombstones).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ChangeRecord {
    /// Creates a record for a live (non-deleted) change.
    pub fn update(
        key: impl Into<String>,
        url: impl Into<String>,
        seq: u64,
        etag: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            seq,
            etag: etag.into(),
            deleted: false,
            data: Some(data),
        }
    }

    /// Creates a tombstone record.
    pub fn tombstone(
        key: impl Into<String>,
        url: impl Into<String>,
        seq: u64,
        etag: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            seq,
            etag: etag.into(),
            deleted: true,
            data: None,
        }
    }

    /// Encodes a list response body.
    pub fn encode_list(records: &[ChangeRecord]) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(records)?)
    }

    /// Decodes a list response body.
    pub fn decode_list(bytes: &[u8]) -> ProtocolResult<Vec<ChangeRecord>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encodes records as a run of list body elements, each preceded by a comma
/// unless it opens the array (`first`).
///
/// A list body is `[`, the runs in order, then `]`.
pub fn encode_list_elements(records: &[ChangeRecord], first: bool) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 || !first {
            out.push(b',');
        }
        serde_json::to_writer(&mut out, record)?;
    }
    Ok(out)
}

/// Encodes one record as a feed line (JSON object followed by `\n`).
pub fn encode_feed_line(record: &ChangeRecord) -> ProtocolResult<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}
