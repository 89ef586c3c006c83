//! Request handlers for the read endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::feed::FeedConnection;
use crate::list::ListPager;
use std::sync::Arc;
use syncfeed_core::{is_valid_key, ChangeItem, CollectionRegistry};
use syncfeed_protocol::{item_url, ChangeRecord, FeedQuery};
use tokio::sync::watch;
use tracing::{debug, info};

/// Result of a conditional point read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointRead {
    /// The client's copy is current.
    NotModified {
        /// Current etag.
        etag: String,
    },
    /// The current view.
    Found {
        /// Current etag.
        etag: String,
        /// Serialized view.
        body: Vec<u8>,
    },
    /// Unknown or deleted key.
    NotFound,
}

/// Handler for feed requests.
///
/// Owns the collection registry for the lifetime of the server.
pub struct FeedService {
    registry: Arc<CollectionRegistry>,
    config: ServerConfig,
    closing: watch::Sender<bool>,
}

impl FeedService {
    /// Creates a handler over a registry.
    pub fn new(registry: Arc<CollectionRegistry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            closing: watch::Sender::new(false),
        }
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Ends every open feed and makes new feeds end at once.
    pub fn close_feeds(&self) {
        self.closing.send_replace(true);
        info!("closing open feeds");
    }

    /// Returns true once `close_feeds` has been called.
    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Returns every change after `since`, in sequence order, as a pager
    /// over the JSON array body.
    pub fn list_changes(&self, service: &str, since: u64) -> ServerResult<ListPager> {
        let collection = self.registry.require(service)?;
        debug!(collection = service, since, "list opened");
        Ok(ListPager::new(
            collection,
            self.config.service_url(service),
            since,
            self.config.scan_batch_size,
        ))
    }

    /// Opens a feed connection.
    pub fn open_feed(&self, service: &str, query: FeedQuery) -> ServerResult<FeedConnection> {
        let collection = self.registry.require(service)?;
        let mut timeout = query.feed_timeout();
        if let Some(max) = self.config.max_feed_timeout {
            timeout = timeout.clamp(max);
        }
        debug!(collection = service, since = query.since, timeout = timeout.as_seconds(), "feed opened");
        Ok(FeedConnection::new(
            collection,
            self.config.service_url(service),
            query.since,
            timeout,
            self.config.scan_batch_size,
            self.config.subscriber_queue_capacity,
            self.closing.subscribe(),
        ))
    }

    /// Reads the current view of one key, honouring `If-None-Match`.
    pub fn point_read(
        &self,
        service: &str,
        key: &str,
        if_none_match: Option<&str>,
    ) -> ServerResult<PointRead> {
        let collection = self.registry.require(service)?;
        if !is_valid_key(key) {
            return Ok(PointRead::NotFound);
        }
        let item = match collection.get(key)? {
            Some(item) if !item.deleted => item,
            _ => return Ok(PointRead::NotFound),
        };

        if if_none_match.is_some_and(|header| etag_matches(header, &item.etag)) {
            return Ok(PointRead::NotModified { etag: item.etag });
        }
        Ok(PointRead::Found {
            etag: item.etag,
            body: item.snapshot,
        })
    }
}

/// Converts a stored item into its wire form.
pub(crate) fn to_record(service_url: &str, item: &ChangeItem) -> ServerResult<ChangeRecord> {
    let url = item_url(service_url, &item.key);
    Ok(match item.view().map_err(ServerError::from)? {
        Some(data) => ChangeRecord::update(&item.key, url, item.sequence, &item.etag, data),
        None => ChangeRecord::tombstone(&item.key, url, item.sequence, &item.etag),
    })
}

/// Matches an `If-None-Match` header value against an etag.
fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate.trim_matches('"') == etag
    })
}
