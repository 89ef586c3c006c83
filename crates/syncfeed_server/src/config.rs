//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the feed server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Externally visible base URL, used to build record URLs.
    pub public_base_url: String,
    /// Capacity of each live subscriber's queue.
    pub subscriber_queue_capacity: usize,
    /// Maximum items fetched per store read.
    pub scan_batch_size: usize,
    /// Upper bound applied to client-supplied feed timeouts.
    pub max_feed_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Creates a configuration whose public URL is derived from the bind
    /// address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            public_base_url: format!("http://{bind_addr}"),
            subscriber_queue_capacity: 1000,
            scan_batch_size: 500,
            max_feed_timeout: None,
        }
    }

    /// Sets the public base URL.
    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the subscriber queue capacity (minimum 1).
    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the scan batch size (minimum 1).
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size.max(1);
        self
    }

    /// Clamps positive and single-shot feed timeouts to `max`.
    pub fn with_max_feed_timeout(mut self, max: Duration) -> Self {
        self.max_feed_timeout = Some(max);
        self
    }

    /// Returns the root URL of a service (collection).
    pub fn service_url(&self, service: &str) -> String {
        format!("{}/{}", self.public_base_url, service)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
