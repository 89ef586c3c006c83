//! # syncfeed protocol
//!
//! Wire types and codecs shared by the feed server and its followers.
//!
//! This crate provides:
//! - `ChangeRecord`, the per-change JSON object served by list and feed
//! - Query parameter types (`ListQuery`, `FeedQuery`, `FeedTimeout`)
//! - `RecordDecoder`, a pull-based decoder for a stream of
//!   self-delimiting JSON objects
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Feed body
//!
//! A feed response is a sequence of JSON objects, one per line:
//!
//! ```text
//! {"key":"A","url":"http://host/products/items/A","seq":1,"etag":"9f..","deleted":false,"data":{..}}
//! {"key":"B","url":"http://host/products/items/B","seq":2,"etag":"04..","deleted":true}
//! ```
//!
//! Objects may arrive one at a time over a long period. The decoder tells a
//! graceful end of stream apart from a stream cut in the middle of an object.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod error;
mod query;
mod record;

pub use decoder::RecordDecoder;
pub use error::{ProtocolError, ProtocolResult};
pub use query::{FeedQuery, FeedTimeout, ListQuery};
pub use record::{encode_feed_line, encode_list_elements, ChangeRecord};

/// Path segment of the list endpoint, relative to a service root.
pub const LIST_PATH: &str = "changes/list";

/// Path segment of the feed endpoint, relative to a service root.
pub const FEED_PATH: &str = "changes/feed";

/// Path segment under which individual records are served.
pub const ITEMS_PATH: &str = "items";

/// Builds the canonical URL of a single record.
///
/// `service_url` is the service root, e.g. `http://host:8080/products`.
pub fn item_url(service_url: &str, key: &str) -> String {
    format!("{}/{}/{}", service_url.trim_end_matches('/'), ITEMS_PATH, key)
}

/// Builds the feed URL for a service root.
pub fn feed_url(service_url: &str) -> String {
    format!("{}/{}", service_url.trim_end_matches('/'), FEED_PATH)
}

/// Builds the list URL for a service root.
pub fn list_url(service_url: &str) -> String {
    format!("{}/{}", service_url.trim_end_matches('/'), LIST_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_ignore_trailing_slash() {
        assert_eq!(
            item_url("http://h/products/", "A"),
            "http://h/products/items/A"
        );
        assert_eq!(feed_url("http://h/products"), "http://h/products/changes/feed");
        assert_eq!(list_url("http://h/products/"), "http://h/products/changes/list");
    }
}
