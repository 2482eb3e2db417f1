#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Pano Viewer - Bus Relay and Streaming Proxy
//!
//! Backend for the panorama viewer activity. It keeps one connection to a
//! rosbridge bus, relays view-sync and pano messages to browser clients over
//! WebSocket, publishes client requests back onto the bus, and proxies
//! remote panorama downloads through a scratch file.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Envelopes, translation rules, lifecycle states
//!   - `envelope`: Outbound envelope, payloads, connection IDs
//!   - `translation`: Per-channel translators and the dispatch table
//!   - `lifecycle`: Activity state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the bus, client fan-out and window
//!   - `services`: Relay and activity lifecycle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `bus`: Rosbridge WebSocket client with reconnect
//!   - `broadcast`: Per-client broadcast and direct queues
//!   - `http`: WebSocket endpoint, streaming proxy, health routes
//!   - `config`: Configuration from the environment
//!   - `window`: Window visibility tracking
//!
//! # Data Flow
//!
//! ```text
//!                 ┌─────────┐  broadcast  ┌──────────────┐
//! rosbridge ─────►│  Relay  │────────────►│ ConnectionHub│──► Client 1..N
//!     ▲           └─────────┘             └──────────────┘
//!     │  publish       ▲                          │
//!     └────────────────┴──── client messages ◄────┘
//!
//! GET /proxy?query=<url> ──► reqwest ──► scratch file ──► response body
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Envelopes and translation with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::envelope::{ChannelName, ConnectionId, Envelope, Payload};
pub use domain::lifecycle::{ActivityState, LifecycleError, LifecycleOp};
pub use domain::translation::{DispatchTable, TranslationError, Translator};

// Application services
pub use application::services::{
    Activity, ClientOutcome, LastMessageCell, Relay, RelayOutcome, RelaySettings,
};

// Infrastructure config
pub use infrastructure::config::{
    BusSettings, ChannelSettings, ConfigError, ProxySettings, ProxyStatusMode, ServerSettings,
    ViewerConfig, WindowSettings,
};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, StreamingProxy, router};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{ConnectionHub, HubStats, SharedConnectionHub};

// Bus client
pub use infrastructure::bus::{
    BusClientConfig, BusEvent, BusStatus, RosbridgeClient, RosbridgePublisher,
};

// Window
pub use infrastructure::window::TrackedWindow;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
