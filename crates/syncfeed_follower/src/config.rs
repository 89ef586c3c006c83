//! Configuration for followers.

use std::time::Duration;

/// Configuration for following one feed.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Service root URL, e.g. `http://host:8080/products`.
    pub url: String,
    /// Feed timeout in seconds, sent as `timeout=`.
    pub feed_timeout: i64,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl FollowerConfig {
    /// Creates a configuration that keeps the feed open indefinitely.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            feed_timeout: 0,
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the feed timeout.
    pub fn with_feed_timeout(mut self, seconds: i64) -> Self {
        self.feed_timeout = seconds;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Reconnect delays after consecutive failures.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Growth factor per further failure.
    pub multiplier: f64,
    /// Upper bound.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the delay after `failures` consecutive failures (0 = none).
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if delay.is_finite() && delay < max {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            multiplier: 1.3,
            max_delay: Duration::from_secs(3600),
        }
    }
}
