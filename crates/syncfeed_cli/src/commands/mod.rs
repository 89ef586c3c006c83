//! CLI command implementations.

pub mod compact;
pub mod follow;
pub mod inspect;
pub mod reset_checkpoint;
pub mod serve;

use tracing::warn;

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub(crate) async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
