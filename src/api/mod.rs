//! HTTP, Server-Sent Events and WebSocket access to the status tree
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Subscriptions** on tree nodes, one per streaming request
//! - **Point-in-time reads** through `get_status` with a timeout
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/config` - Loaded configuration
//! - `GET /api/applications` - Redirect to the collection status
//! - `GET /api/status/applications` - Collection status
//! - `GET /api/status/application/{app}[/{service}[/{instance}]]` - Node status
//! - `GET /api/streaming/...` - Same paths as Server-Sent Events
//! - `WS /api/ws/...` - Same paths over WebSocket
//!
//! Every status endpoint accepts `depth`, `full`, `refresh` and `only_changes`.

#[cfg(feature = "api")]
pub mod error;
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
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{HealthResponse, StatusQuery};

pub use crate::config::ApiConfig;

#[cfg(feature = "api")]
use axum::{Router, routing::get};
#[cfg(feature = "api")]
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

/// Build the router with all routes and layers
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/config", get(routes::config::get_config))
        .route("/api/applications", get(routes::status::applications_redirect))
        .route("/api/status/applications", get(routes::status::get_collection))
        .route("/api/status/application/*path", get(routes::status::get_node))
        .route(
            "/api/streaming/applications",
            get(routes::streaming::stream_collection),
        )
        .route(
            "/api/streaming/application/*path",
            get(routes::streaming::stream_node),
        )
        .route("/api/ws/applications", get(websocket::collection_handler))
        .route("/api/ws/application/*path", get(websocket::node_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
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
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
