//! Follow command implementation.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use syncfeed_follower::{
    DirectoryMirror, FileCheckpointStore, FollowerConfig, FollowerRegistry, HttpFeedTransport,
    DEFAULT_CONNECT_TIMEOUT,
};
use tracing::info;

/// Runs the follow command: mirrors `url` into `mirror` until Ctrl-C or
/// until the follower gives up.
pub fn run(url: &str, mirror: &Path, state: &Path, timeout: i64) -> Result<(), Box<dyn Error>> {
    let applier = Arc::new(DirectoryMirror::open(mirror)?);
    let registry = FollowerRegistry::new(
        Arc::new(HttpFeedTransport::new(DEFAULT_CONNECT_TIMEOUT)?),
        Arc::new(FileCheckpointStore::open(state)?),
    );

    let config = FollowerConfig::new(url).with_feed_timeout(timeout);
    let url = config.url.clone();
    info!(
        %url,
        checkpoint = registry.checkpoint(&url)?,
        mirror = %mirror.display(),
        "starting follower"
    );
    registry.follow(config, applier)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut poll = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = super::ctrl_c() => break,
                _ = poll.tick() => {
                    if !registry.is_following(&url) {
                        break;
                    }
                }
            }
        }
    });

    let result = registry.unfollow(&url);
    println!(
        "Stopped following {url} at checkpoint {}",
        registry.checkpoint(&url)?
    );
    result?;
    Ok(())
}
