//! HTTP front end for the nsite gateway.
//!
//! Provides a [`GatewayServer`] that answers every request by handing the
//! `Host` header and path to [`Gateway::resolve_content`] and streaming the
//! verified blob back. There are no routes: the hostname selects the site.
//!
//! Responses carry permissive CORS headers, and requests are traced with
//! `tower-http`.

mod error;
mod handlers;


use std::sync::Arc;

use axum::Router;
use nsite_engine::Gateway;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::HttpError;

/// Shared state of the handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub gateway: Arc<Gateway>,
}

/// Configuration for creating a [`GatewayServer`].
pub struct GatewayServerConfig {
    /// The pipeline to serve.
    pub gateway: Arc<Gateway>,
}

/// HTTP server backed by a [`Gateway`].
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: GatewayServerConfig) -> Self {
        let state = AppState {
            gateway: config.gateway,
        };
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);

        Router::new()
            .fallback(handlers::serve_site)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on the given TCP address.
    pub async fn serve(self, addr: &str) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "gateway listening");
        axum::serve(listener, self.router).await
    }

    /// Serve with graceful shutdown triggered by the given future.
    ///
    /// When `shutdown` completes, the server stops accepting new connections
    /// and waits for in-flight requests to finish.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "gateway listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
