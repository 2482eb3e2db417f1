//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Rosbridge WebSocket client, publisher and event dispatch.
pub mod bus;

/// Broadcast channel adapters for client fan-out.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// HTTP server: WebSocket endpoint, streaming proxy, health and activity routes.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// Window adapter.
pub mod window;
