//! # syncfeed core
//!
//! Change-log engine for syncfeed.
//!
//! This crate provides:
//! - Change store backends (in-memory and a durable append-only journal)
//! - The per-collection sequencer (single-writer section)
//! - The publisher that turns host record commits into change items
//! - Live subscriber fan-out
//! - The reindexer that rebuilds a log after its publish settings change
//!
//! ## Key Invariants
//!
//! - Sequence numbers are strictly increasing per collection and never reused
//! - One change item per (collection, key); deletions leave tombstones
//! - An item's sequence is that of its latest material change
//! - No-op republishes never consume a sequence
//! - A subscriber registered after a catch-up sees every later change exactly
//!   once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod error;
mod item;
mod publisher;
mod reindex;
mod rules;
mod sequencer;
mod store;
mod subscriber;

pub use collection::{CollectionRegistry, PublishedCollection};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult, RuleError};
pub use item::{
    compute_etag, is_valid_key, validate_key, ChangeItem, ChangeLogState, ChangeWrite, MAX_KEY_LEN,
};
pub use publisher::{PublishOutcome, Publisher};
pub use reindex::{ReindexReport, Reindexer};
pub use rules::{PublishRules, PublishSettings};
pub use sequencer::Sequencer;
pub use store::{ChangeStore, FileChangeStore, FileStoreOptions, MemoryChangeStore};
pub use subscriber::{ChangeSink, Delivery, FanOut, SubscriberId, SubscriberSet};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
