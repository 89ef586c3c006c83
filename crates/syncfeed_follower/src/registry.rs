//! Registry of running followers, one per URL.

use crate::applier::ChangeApplier;
use crate::checkpoint::CheckpointStore;
use crate::config::FollowerConfig;
use crate::error::{FollowError, FollowResult};
use crate::follower::{Follower, FollowerHandle};
use crate::transport::FeedTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the followers of one client, sharing a transport and a checkpoint
/// store.
pub struct FollowerRegistry {
    transport: Arc<dyn FeedTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
    followers: Mutex<HashMap<String, FollowerHandle>>,
}

impl std::fmt::Debug for FollowerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FollowerRegistry")
            .field("followers", &self.followers.lock().len())
            .finish_non_exhaustive()
    }
}

impl FollowerRegistry {
    /// Creates an empty registry.
    pub fn new(transport: Arc<dyn FeedTransport>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            transport,
            checkpoints,
            followers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the checkpoint store.
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Starts following `config.url`, applying changes to `applier`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyFollowing` if a follower for the URL is running.
    pub fn follow(
        &self,
        config: FollowerConfig,
        applier: Arc<dyn ChangeApplier>,
    ) -> FollowResult<()> {
        let url = config.url.clone();
        let mut followers = self.followers.lock();

        if let Some(existing) = followers.get(&url) {
            if !existing.is_finished() {
                return Err(FollowError::AlreadyFollowing { url });
            }
        }
        if let Some(finished) = followers.remove(&url) {
            if let Err(e) = finished.join() {
                warn!(url = %url, error = %e, "previous follower had failed");
            }
        }

        let follower = Follower::new(
            config,
            Arc::clone(&self.transport),
            Arc::clone(&self.checkpoints),
            applier,
        );
        followers.insert(url.clone(), follower.spawn()?);
        info!(url = %url, "following");
        Ok(())
    }

    /// Stops following a URL and waits for its follower to exit.
    ///
    /// # Errors
    ///
    /// Returns `NotFollowing` for unknown URLs, or the error a follower
    /// had already stopped with.
    pub fn unfollow(&self, url: &str) -> FollowResult<()> {
        let url = normalize_url(url);
        let handle = self
            .followers
            .lock()
            .remove(url)
            .ok_or_else(|| FollowError::NotFollowing { url: url.into() })?;

        handle.stop();
        let result = handle.join();
        info!(url, "unfollowed");
        result
    }

    /// Returns true if a follower for the URL is running.
    pub fn is_following(&self, url: &str) -> bool {
        self.followers
            .lock()
            .get(normalize_url(url))
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns the URLs with a running follower, sorted.
    pub fn following(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .followers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Returns the last applied sequence for a URL.
    pub fn checkpoint(&self, url: &str) -> FollowResult<u64> {
        Ok(self.checkpoints.load(normalize_url(url))?.checkpoint)
    }

    /// Forgets the checkpoint for a URL so the next follow starts over.
    ///
    /// # Errors
    ///
    /// Returns `ActiveFollower` while the URL is being followed.
    pub fn reset_checkpoint(&self, url: &str) -> FollowResult<()> {
        let url = normalize_url(url);
        if self.is_following(url) {
            return Err(FollowError::ActiveFollower { url: url.into() });
        }
        self.checkpoints.reset(url)
    }

    /// Stops every follower and waits for them.
    pub fn shutdown(&self) {
        let handles: Vec<FollowerHandle> = self
            .followers
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            let url = handle.url().to_string();
            if let Err(e) = handle.join() {
                warn!(url = %url, error = %e, "follower ended with error");
            }
        }
    }
}

impl Drop for FollowerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn normalize_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
