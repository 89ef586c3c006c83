//! The follow loop for one feed.

use crate::applier::ChangeApplier;
use crate::checkpoint::CheckpointStore;
use crate::config::FollowerConfig;
use crate::error::{FollowError, FollowResult};
use crate::transport::{FeedRequest, FeedTransport};
use futures_util::StreamExt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use syncfeed_protocol::{ChangeRecord, ProtocolError, RecordDecoder};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Follows one feed and applies its changes locally.
#[derive(Clone)]
pub struct Follower {
    config: FollowerConfig,
    transport: Arc<dyn FeedTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
    applier: Arc<dyn ChangeApplier>,
}

impl std::fmt::Debug for Follower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Follower")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Counters for one connection.
#[derive(Debug, Default, Clone, Copy)]
struct SessionProgress {
    applied: u64,
}

impl Follower {
    /// Creates a follower.
    pub fn new(
        config: FollowerConfig,
        transport: Arc<dyn FeedTransport>,
        checkpoints: Arc<dyn CheckpointStore>,
        applier: Arc<dyn ChangeApplier>,
    ) -> Self {
        Self {
            config,
            transport,
            checkpoints,
            applier,
        }
    }

    /// Returns the followed URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Returns the configuration.
    pub fn config(&self) -> &FollowerConfig {
        &self.config
    }

    /// Follows the feed until `cancel` turns true or its sender is dropped.
    ///
    /// Clean stream ends reconnect at once. Retryable failures back off and
    /// replay from the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error. Cancellation returns `Ok`.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> FollowResult<()> {
        let url = self.config.url.as_str();
        let mut failures: u32 = 0;

        loop {
            if *cancel.borrow() {
                break;
            }

            let mut progress = SessionProgress::default();
            let outcome = tokio::select! {
                outcome = self.session(&mut progress) => outcome,
                _ = cancelled(&mut cancel) => break,
            };

            match outcome {
                Ok(()) => {
                    debug!(url, applied = progress.applied, "feed ended, reconnecting");
                    failures = 0;
                }
                Err(e) if e.is_retryable() => {
                    failures = if progress.applied > 0 {
                        1
                    } else {
                        failures.saturating_add(1)
                    };
                    let delay = self.config.backoff.delay_for_failure(failures);
                    warn!(url, error = %e, failures, delay_ms = delay.as_millis() as u64, "feed failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(&mut cancel) => break,
                    }
                }
                Err(e) => {
                    error!(url, error = %e, "follower stopped");
                    return Err(e);
                }
            }
        }

        info!(url, "follower cancelled");
        Ok(())
    }

    /// Runs one connection: resume from the checkpoint and apply every
    /// change until the stream ends.
    async fn session(&self, progress: &mut SessionProgress) -> FollowResult<()> {
        let url = self.config.url.as_str();
        let mut state = self.checkpoints.load(url)?;
        let request = FeedRequest::new(url, state.checkpoint, self.config.feed_timeout);
        let mut body = self.transport.open_feed(&request).await?;
        info!(url, since = state.checkpoint, "feed opened");

        let mut decoder = RecordDecoder::new();
        while let Some(chunk) = body.next().await {
            decoder.push(&chunk?);
            while let Some(record) = decoder.next_record()? {
                self.apply(&record, decoder.consumed_bytes())?;
                progress.applied += 1;
                if record.seq > state.checkpoint {
                    state.checkpoint = record.seq;
                    self.checkpoints.save(&state)?;
                }
            }
        }
        decoder.finish()?;
        Ok(())
    }

    fn apply(&self, record: &ChangeRecord, offset: u64) -> FollowResult<()> {
        let key = record.key.as_str();
        if record.deleted {
            self.applier.apply_delete(key)?;
            debug!(url = %self.config.url, key, seq = record.seq, "applied delete");
            return Ok(());
        }

        let data = record.data.as_ref().ok_or_else(|| ProtocolError::Malformed {
            offset,
            message: format!("record {key:?} has neither data nor a deleted flag"),
        })?;
        self.applier.apply_update(key, data)?;
        debug!(url = %self.config.url, key, seq = record.seq, "applied update");
        Ok(())
    }

    /// Runs the follower on its own thread with a current-thread runtime.
    pub fn spawn(self) -> FollowResult<FollowerHandle> {
        let url = self.config.url.clone();
        let (cancel, cancel_rx) = watch::channel(false);
        let thread = thread::Builder::new()
            .name("syncfeed-follower".into())
            .spawn(move || -> FollowResult<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.run(cancel_rx))
            })?;

        Ok(FollowerHandle {
            url,
            cancel,
            thread: Some(thread),
        })
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender also stops the follower.
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Handle to a follower running on its own thread.
///
/// Dropping the handle stops the follower without waiting for it.
#[derive(Debug)]
pub struct FollowerHandle {
    url: String,
    cancel: watch::Sender<bool>,
    thread: Option<JoinHandle<FollowResult<()>>>,
}

impl FollowerHandle {
    /// Returns the followed URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true once the follower thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Asks the follower to stop. In-flight requests and backoff sleeps are
    /// abandoned.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Waits for the follower thread and returns how it ended.
    pub fn join(mut self) -> FollowResult<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                FollowError::Io(io::Error::other(format!(
                    "follower thread for {} panicked",
                    self.url
                )))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for FollowerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
