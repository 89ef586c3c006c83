//! Error types for the change-log engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the change-log engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error from the durable store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record key is not a valid published key.
    #[error("invalid key: {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// A business hook (constraint, view, serializer) failed.
    #[error("publish rule failed: {0}")]
    Rule(#[from] RuleError),

    /// A rebuild of this collection is already running.
    #[error("collection {collection} is already rebuilding")]
    AlreadyRebuilding {
        /// The collection name.
        collection: String,
    },

    /// Change tracking is not enabled for the collection.
    #[error("change tracking not enabled for collection {collection}")]
    NotEnabled {
        /// The collection name.
        collection: String,
    },

    /// Another process holds the store lock.
    #[error("change store locked: another process has exclusive access")]
    StoreLocked,

    /// A sequenced write did not advance the collection's counter.
    #[error("sequence {counter} does not advance past {current} in collection {collection}")]
    StaleSequence {
        /// The collection name.
        collection: String,
        /// Counter carried by the write.
        counter: u64,
        /// Counter already stored.
        current: u64,
    },

    /// The journal holds an append that could not be rolled back.
    #[error("change journal unusable after a failed append; reopen the store")]
    JournalPoisoned,

    /// The journal contains an unreadable entry before its tail.
    #[error("corrupt journal at line {line}: {message}")]
    CorruptJournal {
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Creates a not-enabled error.
    pub fn not_enabled(collection: impl Into<String>) -> Self {
        Self::NotEnabled {
            collection: collection.into(),
        }
    }

    /// Returns true if the error concerns a single change and the caller
    /// should log it and move on.
    pub fn is_per_change(&self) -> bool {
        matches!(self, CoreError::InvalidKey { .. } | CoreError::Rule(_))
    }

    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Io(_) | CoreError::StoreLocked | CoreError::AlreadyRebuilding { .. }
        )
    }
}

/// Failure reported by an injected business hook.
#[derive(Debug, Error)]
#[error("{hook}: {message}")]
pub struct RuleError {
    /// Which hook failed (`constraint`, `view`, `serialize`, `source`).
    pub hook: &'static str,
    /// Message from the hook.
    pub message: String,
}

impl RuleError {
    /// Creates a rule error for the given hook.
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_change_classification() {
        assert!(CoreError::invalid_key("").is_per_change());
        assert!(CoreError::Rule(RuleError::new("view", "boom")).is_per_change());
        assert!(!CoreError::StoreLocked.is_per_change());
        assert!(!CoreError::not_enabled("items").is_per_change());
        assert!(CoreError::StoreLocked.is_transient());
        assert!(!CoreError::invalid_key("").is_transient());
    }

    #[test]
    fn error_display() {
        let err = CoreError::AlreadyRebuilding {
            collection: "items".into(),
        };
        assert_eq!(err.to_string(), "collection items is already rebuilding");

        let err = CoreError::Rule(RuleError::new("constraint", "db down"));
        assert!(err.to_string().contains("constraint: db down"));
    }
}
