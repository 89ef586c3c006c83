//! # syncfeed follower
//!
//! Resumable client for syncfeed change feeds.
//!
//! This crate provides:
//! - A follow loop that keeps a local mirror in step with a remote feed
//! - Durable per-URL checkpoints, so a restarted follower resumes where it
//!   stopped
//! - Appliers for in-memory and on-disk mirrors
//! - An HTTP transport and a scripted one for tests
//!
//! ## Delivery
//!
//! A checkpoint moves only after its change has been applied, so changes
//! are delivered at least once. Appliers overwrite by key, which makes a
//! replay harmless.
//!
//! ## Reconnects
//!
//! A feed that ends cleanly is reopened at once. Network failures and
//! truncated or malformed streams back off (10s, growing by 1.3 per
//! consecutive failure, capped at one hour) and replay from the checkpoint.
//! Client errors such as an unknown collection stop the follower.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod applier;
mod checkpoint;
mod config;
mod error;
mod follower;
mod registry;
mod transport;

pub use applier::{ChangeApplier, DirectoryMirror, MemoryMirror};
pub use checkpoint::{CheckpointStore, DataSyncState, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{BackoffConfig, FollowerConfig};
pub use error::{FollowError, FollowResult};
pub use follower::{Follower, FollowerHandle};
pub use registry::FollowerRegistry;
pub use transport::{
    FeedBody, FeedRequest, FeedTransport, HttpFeedTransport, ScriptedResponse, ScriptedTransport,
    DEFAULT_CONNECT_TIMEOUT,
};
