//! HTTP and WebSocket server for the notification hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Hub handle** for registering connections and querying the registry
//! - **WebSocket** upgrade hands each socket to the hub's client actors
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check with connected client count
//! - `GET /api/v1/stats` - Hub statistics
//! - `GET /api/v1/clients?topic=` - Connected clients, optionally per topic
//! - `WS /api/v1/stream` - Live notification stream

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod identity;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use identity::{Identity, IdentityResolver};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{ClientCountResponse, HealthResponse};

#[cfg(feature = "api")]
use axum::{Router, routing::get};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

use crate::config::Config;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboards served from another origin
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: crate::util::get_default_bind_addr(),
            enable_cors: true,
        }
    }
}

impl From<&Config> for ApiConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.bind_addr,
            enable_cors: config.enable_cors,
        }
    }
}

/// Build the router with all routes
#[cfg(feature = "api")]
pub fn router(state: ApiState, enable_cors: bool) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/clients", get(routes::clients::count_clients))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use anyhow::Context;

    info!("starting API server on {}", config.bind_addr);

    let app = router(state, config.enable_cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
