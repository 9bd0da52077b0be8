//! HTTP server implementation.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{check, health, reset, AppState};
use crate::error::Result;
use crate::policy::DecisionEngine;

/// Build the service router.
///
/// `/reset` is only mounted when `allow_reset` is set.
pub fn router(engine: Arc<DecisionEngine>, allow_reset: bool) -> Router {
    let state = Arc::new(AppState { engine });

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/check", post(check));

    if allow_reset {
        router = router.route("/reset", post(reset));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// HTTP server for the check service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The decision engine instance
    engine: Arc<DecisionEngine>,
    /// Whether the admin reset route is exposed
    allow_reset: bool,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, engine: Arc<DecisionEngine>) -> Self {
        Self {
            addr,
            engine,
            allow_reset: false,
        }
    }

    /// Expose the administrative reset route.
    pub fn with_reset(mut self, allow_reset: bool) -> Self {
        self.allow_reset = allow_reset;
        self
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %self.addr,
            allow_reset = self.allow_reset,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, router(self.engine, self.allow_reset))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use crate::store::MemoryStore;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let engine = Arc::new(DecisionEngine::new(
            Arc::new(MemoryStore::new()),
            &LimitsConfig::default(),
        ));
        let server = HttpServer::new(addr, engine).with_reset(true);
        assert!(server.allow_reset);
    }
}
