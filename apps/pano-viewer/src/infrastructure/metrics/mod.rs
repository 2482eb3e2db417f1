//! Prometheus Metrics Module
//!
//! Exposes viewer metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Relay**: bus messages in, envelopes out, translation failures
//! - **Clients**: connected WebSocket clients, client messages by outcome
//! - **Bus**: connection state and reconnects
//! - **Proxy**: requests, bytes streamed, failures, fetch latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server. Recording before
//! [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "pano_viewer_bus_messages_total",
        "Bus messages received, by relay outcome"
    );
    describe_counter!(
        "pano_viewer_envelopes_delivered_total",
        "Envelopes queued for connected clients"
    );
    describe_counter!(
        "pano_viewer_envelopes_lagged_total",
        "Envelopes skipped by slow clients"
    );
    describe_counter!(
        "pano_viewer_client_messages_total",
        "Client messages, by outcome"
    );
    describe_gauge!(
        "pano_viewer_connected_clients",
        "Connected WebSocket clients"
    );
    describe_gauge!("pano_viewer_bus_connected", "1 while the bus is connected");
    describe_counter!(
        "pano_viewer_bus_reconnects_total",
        "Bus reconnection attempts"
    );
    describe_counter!(
        "pano_viewer_proxy_requests_total",
        "Proxy requests, by status mode"
    );
    describe_counter!(
        "pano_viewer_proxy_bytes_total",
        "Bytes fetched through the proxy"
    );
    describe_counter!(
        "pano_viewer_proxy_errors_total",
        "Proxy failures, by kind"
    );
    describe_histogram!(
        "pano_viewer_proxy_fetch_seconds",
        "Time to fetch a proxied resource into its scratch file"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Label for what happened to a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessageOutcome {
    /// Broadcast to clients.
    Relayed,
    /// Channel not registered.
    Unregistered,
    /// Translation failed.
    Rejected,
}

impl BusMessageOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Relayed => "relayed",
            Self::Unregistered => "unregistered",
            Self::Rejected => "rejected",
        }
    }
}

/// Label for what happened to a client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessageOutcome {
    /// Published on the bus.
    Published,
    /// Unknown type or unparseable.
    Dropped,
    /// Bus refused the publish.
    Failed,
}

impl ClientMessageOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        }
    }
}

/// Record a bus message and what the relay did with it.
pub fn record_bus_message(outcome: BusMessageOutcome) {
    counter!(
        "pano_viewer_bus_messages_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record envelopes queued for clients.
pub fn record_envelopes_delivered(count: usize) {
    counter!("pano_viewer_envelopes_delivered_total").increment(count as u64);
}

/// Record envelopes a slow client skipped.
pub fn record_envelopes_lagged(count: u64) {
    counter!("pano_viewer_envelopes_lagged_total").increment(count);
}

/// Record a client message outcome.
pub fn record_client_message(outcome: ClientMessageOutcome) {
    counter!(
        "pano_viewer_client_messages_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_clients(count: usize) {
    gauge!("pano_viewer_connected_clients").set(count as f64);
}

/// Update the bus connection state.
pub fn set_bus_connected(connected: bool) {
    gauge!("pano_viewer_bus_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a bus reconnection attempt.
pub fn record_bus_reconnect() {
    counter!("pano_viewer_bus_reconnects_total").increment(1);
}

/// Record a proxy request.
pub fn record_proxy_request(mode: &'static str) {
    counter!("pano_viewer_proxy_requests_total", "mode" => mode).increment(1);
}

/// Record bytes fetched through the proxy.
pub fn record_proxy_bytes(bytes: u64) {
    counter!("pano_viewer_proxy_bytes_total").increment(bytes);
}

/// Record a proxy failure.
pub fn record_proxy_error(kind: &'static str) {
    counter!("pano_viewer_proxy_errors_total", "kind" => kind).increment(1);
}

/// Record how long a proxy fetch took.
pub fn record_proxy_fetch_duration(duration: Duration) {
    histogram!("pano_viewer_proxy_fetch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
