//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the source is streaming)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::FeedStatus;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Tick source status.
    pub feed: FeedInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming.
    Healthy,
    /// Connecting or subscribing.
    Degraded,
    /// Disconnected or failed.
    Unhealthy,
}

/// Tick source status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Source kind (`live` or `synthetic`).
    pub source: &'static str,
    /// Connection state.
    pub state: &'static str,
    /// Whether ticks are flowing.
    pub streaming: bool,
    /// Symbols subscribed on the current connection.
    pub subscribed_symbols: usize,
    /// Frames received.
    pub frames_received: u64,
    /// Ticks emitted into the bridge.
    pub ticks_emitted: u64,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Last time streaming was reached.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Error that ended the last connection.
    pub last_error: Option<String>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<FeedStatus>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, feed: Arc<FeedStatus>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check HTTP server.
#[derive(Debug)]
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.state().is_streaming() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = feed_info(&state.feed);
    let status = determine_health_status(state.feed.state());

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
    }
}

fn feed_info(status: &FeedStatus) -> FeedInfo {
    let state = status.state();
    FeedInfo {
        source: status.source(),
        state: state.as_str(),
        streaming: state.is_streaming(),
        subscribed_symbols: status.subscribed_symbols(),
        frames_received: status.frames_received(),
        ticks_emitted: status.ticks_emitted(),
        reconnect_attempts: status.reconnect_attempts(),
        last_connected_at: status.last_connected_at(),
        last_error: status.last_error(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Streaming => HealthStatus::Healthy,
        ConnectionState::Connecting
        | ConnectionState::Authenticating
        | ConnectionState::Subscribing => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Closing | ConnectionState::Failed => {
            HealthStatus::Unhealthy
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
