//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding or decoding change records.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The stream contained bytes that are not a valid change record.
    #[error("malformed change record at byte {offset}: {message}")]
    Malformed {
        /// Offset into the stream where the bad object starts.
        offset: u64,
        /// Parser message.
        message: String,
    },

    /// The stream ended in the middle of an object.
    #[error("stream truncated with {pending} undecoded bytes")]
    Truncated {
        /// Number of bytes left in the buffer.
        pending: usize,
    },

    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns true if the error means the stream was cut short rather than
    /// carrying bad data.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::Truncated { .. })
    }
}
