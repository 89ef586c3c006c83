//! Query parameters of the read endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of `GET /{service}/changes/list`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Only changes with a sequence strictly greater than this are returned.
    #[serde(default)]
    pub since: u64,
}

/// Parameters of `GET /{service}/changes/feed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Only changes with a sequence strictly greater than this are returned.
    #[serde(default)]
    pub since: u64,
    /// Timeout in seconds. See [`FeedTimeout`].
    #[serde(default)]
    pub timeout: i64,
}

impl FeedQuery {
    /// Creates a feed query.
    pub fn new(since: u64, timeout: i64) -> Self {
        Self { since, timeout }
    }

    /// Interprets the raw timeout value.
    pub fn feed_timeout(&self) -> FeedTimeout {
        FeedTimeout::from_seconds(self.timeout)
    }
}

/// How long a feed connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedTimeout {
    /// `timeout=0`: the connection never expires on its own.
    Never,
    /// `timeout>0`: hard deadline.
    Deadline(Duration),
    /// `timeout<0`: same deadline, but the response completes as soon as the
    /// first change has been written.
    FirstChange(Duration),
}

impl FeedTimeout {
    /// Converts the wire representation (signed seconds).
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            0 => FeedTimeout::Never,
            s if s > 0 => FeedTimeout::Deadline(Duration::from_secs(s as u64)),
            s => FeedTimeout::FirstChange(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// Converts back to signed seconds.
    pub fn as_seconds(&self) -> i64 {
        match self {
            FeedTimeout::Never => 0,
            FeedTimeout::Deadline(d) => d.as_secs() as i64,
            FeedTimeout::FirstChange(d) => -(d.as_secs() as i64),
        }
    }

    /// Returns the deadline duration, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            FeedTimeout::Never => None,
            FeedTimeout::Deadline(d) | FeedTimeout::FirstChange(d) => Some(*d),
        }
    }

    /// Returns true if the response completes after the first change.
    pub fn is_single_shot(&self) -> bool {
        matches!(self, FeedTimeout::FirstChange(_))
    }

    /// Clamps the deadline to `max`. `Never` is left alone.
    pub fn clamp(self, max: Duration) -> Self {
        match self {
            FeedTimeout::Never => FeedTimeout::Never,
            FeedTimeout::Deadline(d) => FeedTimeout::Deadline(d.min(max)),
            FeedTimeout::FirstChange(d) => FeedTimeout::FirstChange(d.min(max)),
        }
    }
}
