//! HTTP server exposing rate limited routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{rate_limit_middleware, RateLimitState};
use crate::error::Result;
use crate::ratelimit::{Preset, RateLimitStore};

/// An analytics event submitted by the web front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Event name, e.g. `page_view`
    pub event: String,
    /// Free-form event properties
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// HTTP server that puts rate limiting in front of its routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Store shared by every route's limiter
    store: Arc<RateLimitStore>,
}

impl HttpServer {
    /// Create a new server over a shared rate limit store.
    pub fn new(addr: SocketAddr, store: Arc<RateLimitStore>) -> Self {
        Self { addr, store }
    }

    /// Build the application router.
    pub fn router(&self) -> Router {
        router(self.store.clone())
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let app = self.router();

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

/// Build the router: `/health` is open, `/api/analytics` uses the `api` preset.
pub fn router(store: Arc<RateLimitStore>) -> Router {
    let analytics = Router::new()
        .route("/api/analytics", post(ingest_event))
        .route_layer(middleware::from_fn_with_state(
            RateLimitState::preset(Preset::Api, store),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(analytics)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ingest_event(Json(event): Json<AnalyticsEvent>) -> impl IntoResponse {
    if event.event.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "event name is required" })),
        );
    }

    info!(
        event = %event.event,
        property_count = event.properties.len(),
        "Analytics event received"
    );

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true })),
    )
}
