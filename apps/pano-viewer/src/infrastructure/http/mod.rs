//! HTTP Server
//!
//! One axum server carries every HTTP surface of the viewer.
//!
//! # Endpoints
//!
//! - `GET /websocket` - Real-time envelope channel
//! - `GET /<proxy-path>?query=<url>` - Streaming proxy
//! - `POST /activity/{op}` - `activate`, `deactivate` or `update`
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while serving)
//! - `GET /metrics` - Prometheus metrics in text format

pub mod proxy;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::Activity;
use crate::domain::envelope::Envelope;
use crate::domain::lifecycle::ActivityState;
use crate::infrastructure::broadcast::SharedConnectionHub;
use crate::infrastructure::bus::BusStatus;
use crate::infrastructure::metrics::get_metrics_handle;

pub use proxy::{ProxyError, StreamingProxy};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Viewer version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Activity lifecycle state.
    pub activity: ActivityState,
    /// Whether the window is shown.
    pub window_visible: bool,
    /// Configuration refreshes applied to the window.
    pub window_updates: u64,
    /// Bus connection status.
    pub bus: BusInfo,
    /// Connected clients.
    pub clients: ClientInfo,
    /// Last view-sync envelope, if any.
    pub last_view_sync: Option<Envelope>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving with the bus connected.
    Healthy,
    /// Serving without the bus.
    Degraded,
    /// Not serving.
    Unhealthy,
}

/// Bus connection status.
#[derive(Debug, Clone, Serialize)]
pub struct BusInfo {
    /// Whether the bus is connected.
    pub connected: bool,
    /// Messages received since startup.
    pub messages_received: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
}

/// Connected client information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Registered WebSocket connections.
    pub connected: usize,
    /// Live broadcast receivers (one per open socket).
    pub broadcast_receivers: usize,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for all HTTP handlers.
pub struct AppState {
    version: String,
    started_at: Instant,
    activity: Arc<Activity>,
    hub: SharedConnectionHub,
    bus_status: Arc<BusStatus>,
    proxy: Arc<StreamingProxy>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub fn new(
        activity: Arc<Activity>,
        hub: SharedConnectionHub,
        bus_status: Arc<BusStatus>,
        proxy: Arc<StreamingProxy>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            activity,
            hub,
            bus_status,
            proxy,
            shutdown,
        }
    }

    /// The activity.
    #[must_use]
    pub const fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// The connection hub.
    #[must_use]
    pub const fn hub(&self) -> &SharedConnectionHub {
        &self.hub
    }

    /// The streaming proxy.
    #[must_use]
    pub const fn proxy(&self) -> &Arc<StreamingProxy> {
        &self.proxy
    }

    /// Server shutdown token.
    #[must_use]
    pub const fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn health(&self) -> HealthResponse {
        let activity = self.activity.state();
        let hub = self.hub.stats();
        let bus = BusInfo {
            connected: self.bus_status.is_connected(),
            messages_received: self.bus_status.messages_received(),
            reconnect_attempts: self.bus_status.reconnect_attempts(),
        };

        HealthResponse {
            status: determine_health_status(activity, bus.connected),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            activity,
            window_visible: self.activity.window_visible(),
            window_updates: self.activity.window_updates(),
            bus,
            clients: ClientInfo {
                connected: hub.connections,
                broadcast_receivers: hub.broadcast_receivers,
            },
            last_view_sync: self
                .activity
                .relay()
                .last_message()
                .get()
                .map(|envelope| (*envelope).clone()),
        }
    }
}

/// Build the router. The proxy is mounted at `/<proxy_path>`.
#[must_use]
pub fn router(state: Arc<AppState>, proxy_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/websocket", get(websocket::websocket_handler))
        .route("/activity/{op}", post(activity_handler))
        .route(&format!("/{proxy_path}"), get(proxy::proxy_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// The viewer's HTTP server.
pub struct HttpServer {
    port: u16,
    proxy_path: String,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, proxy_path: String, state: Arc<AppState>) -> Self {
        Self {
            port,
            proxy_path,
            state,
        }
    }

    /// Run the server until the state's shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let shutdown = self.state.shutdown().clone();
        let app = router(self.state, &self.proxy_path);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(
            port = self.port,
            proxy_path = %self.proxy_path,
            "HTTP server listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = state.health();
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.activity().state().is_serving() {
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

/// Body of a successful activity operation.
#[derive(Debug, Clone, Serialize)]
struct ActivityResponse {
    state: ActivityState,
    window_visible: bool,
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
) -> Response {
    let activity = state.activity();
    let result = match op.as_str() {
        "activate" => activity.activate().map(|_| ()),
        "deactivate" => activity.deactivate().map(|_| ()),
        "update" => {
            if !activity.apply_configuration() {
                return (StatusCode::CONFLICT, "activity is stopped").into_response();
            }
            Ok(())
        }
        _ => return (StatusCode::NOT_FOUND, format!("unknown operation '{op}'")).into_response(),
    };

    match result {
        Ok(()) => Json(ActivityResponse {
            state: activity.state(),
            window_visible: activity.window_visible(),
        })
        .into_response(),
        Err(e) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}

const fn determine_health_status(activity: ActivityState, bus_connected: bool) -> HealthStatus {
    match (activity.is_serving(), bus_connected) {
        (true, true) => HealthStatus::Healthy,
        (true, false) => HealthStatus::Degraded,
        (false, _) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
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
