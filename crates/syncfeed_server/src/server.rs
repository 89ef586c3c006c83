//! Main feed server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::FeedService;
use crate::routes::routes;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use syncfeed_core::CollectionRegistry;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The feed server.
///
/// Serves every collection enabled in its registry under
/// `/{collection}/changes/list`, `/{collection}/changes/feed` and
/// `/{collection}/items/{key}`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use syncfeed_core::{CollectionRegistry, MemoryChangeStore};
/// use syncfeed_server::{FeedServer, ServerConfig};
///
/// let registry = Arc::new(CollectionRegistry::new(Arc::new(MemoryChangeStore::new())));
/// registry.enable("products");
/// let server = FeedServer::new(registry, ServerConfig::default());
/// let _router = server.router();
/// ```
#[derive(Clone)]
pub struct FeedServer {
    service: Arc<FeedService>,
}

impl FeedServer {
    /// Creates a server over a registry.
    pub fn new(registry: Arc<CollectionRegistry>, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(FeedService::new(registry, config)),
        }
    }

    /// Returns the request handler.
    pub fn service(&self) -> &Arc<FeedService> {
        &self.service
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        self.service.config()
    }

    /// Builds the axum router.
    pub fn router(&self) -> Router {
        routes()
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.service))
    }

    /// Binds the configured address and serves until the process ends.
    pub async fn run(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config().bind_addr)
            .await
            .map_err(|e| ServerError::Internal(format!("bind {}: {e}", self.config().bind_addr)))?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serves until `signal` resolves. Open feeds are closed when it does.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, signal: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(
            %addr,
            base_url = %self.config().public_base_url,
            collections = ?self.service.registry().names(),
            "feed server listening"
        );
        let service = Arc::clone(&self.service);
        let signal = async move {
            signal.await;
            service.close_feeds();
        };
        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
