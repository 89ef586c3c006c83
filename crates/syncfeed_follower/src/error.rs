//! Error types for the follower.

use syncfeed_protocol::ProtocolError;
use thiserror::Error;

/// Result type for follower operations.
pub type FollowResult<T> = Result<T, FollowError>;

/// Errors that can occur while following a feed.
#[derive(Error, Debug)]
pub enum FollowError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The feed body could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The local applier failed.
    #[error("apply error: {0}")]
    Apply(String),

    /// The checkpoint could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A follower for this URL is already running.
    #[error("already following {url}")]
    AlreadyFollowing {
        /// Feed URL.
        url: String,
    },

    /// No follower for this URL.
    #[error("not following {url}")]
    NotFollowing {
        /// Feed URL.
        url: String,
    },

    /// The operation needs the follower to be stopped first.
    #[error("follower for {url} is running")]
    ActiveFollower {
        /// Feed URL.
        url: String,
    },
}

impl FollowError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the follower should back off and try again.
    ///
    /// Truncated and malformed streams are retried from the last checkpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            FollowError::Transport { retryable, .. } => *retryable,
            FollowError::Protocol(_)
            | FollowError::Apply(_)
            | FollowError::Checkpoint(_)
            | FollowError::Io(_) => true,
            _ => false,
        }
    }
}
