//! # syncfeed server
//!
//! HTTP change-feed server.
//!
//! This crate provides:
//! - List mode: every change after a sequence, as a JSON array
//! - Feed mode: a long-lived newline-delimited JSON stream that replays the
//!   log and then follows live changes
//! - Conditional point reads of individual records
//!
//! # Feed timeouts
//!
//! `timeout=0` keeps the feed open until the client leaves, `timeout=T`
//! closes it after `T` seconds, and `timeout=-T` closes it after `T` seconds
//! or as soon as at least one change has been written, whichever is first.
//!
//! # Backpressure
//!
//! Each live subscriber has a bounded queue. A subscriber that falls behind
//! is dropped and its response aborted; the client reconnects with its last
//! sequence.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod feed;
mod handler;
mod list;
mod routes;
mod server;
mod sink;

pub use config::ServerConfig;
pub use error::{ErrorResponse, ServerError, ServerResult};
pub use feed::{CompletionReason, FeedConnection, FeedEvent, FeedState};
pub use handler::{FeedService, PointRead};
pub use list::ListPager;
pub use routes::{routes, AppState, HealthResponse};
pub use server::FeedServer;
pub use sink::{ChannelReceiver, ChannelSink};
