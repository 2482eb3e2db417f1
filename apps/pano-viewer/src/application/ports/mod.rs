//! Port Interfaces
//!
//! Contracts the application layer depends on. Infrastructure adapters
//! implement them; tests substitute mocks.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`BusPort`]: publish a payload on a named bus channel
//! - [`ClientSink`]: deliver envelopes to connected real-time clients
//! - [`WindowPort`]: show, hide and refresh the managed window

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::envelope::{ConnectionId, Envelope, Payload};

// =============================================================================
// Bus
// =============================================================================

/// Bus publish errors. Best-effort: callers log and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The bus connection is down.
    #[error("bus is not connected")]
    Disconnected,
    /// The outbound queue is closed.
    #[error("bus outbound queue closed")]
    QueueClosed,
}

/// Outbound side of the pub/sub bus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BusPort: Send + Sync {
    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: Payload) -> Result<(), BusError>;
}

/// Shared bus handle.
pub type SharedBus = Arc<dyn BusPort>;

// =============================================================================
// Clients
// =============================================================================

/// Delivery to connected real-time clients.
#[cfg_attr(test, mockall::automock)]
pub trait ClientSink: Send + Sync {
    /// Send an envelope to every connected client.
    ///
    /// Returns the number of clients it was queued for.
    fn broadcast(&self, envelope: Arc<Envelope>) -> usize;

    /// Send an envelope to one client only.
    ///
    /// Returns `false` if the client is gone or its queue is full.
    fn send_to(&self, connection: &ConnectionId, envelope: Arc<Envelope>) -> bool;

    /// Forget a client. Returns `false` if it was not registered.
    fn remove(&self, connection: &ConnectionId) -> bool;
}

/// Shared client sink handle.
pub type SharedClientSink = Arc<dyn ClientSink>;

// =============================================================================
// Window
// =============================================================================

/// The visible window owned by the activity.
#[cfg_attr(test, mockall::automock)]
pub trait WindowPort: Send + Sync {
    /// Show or hide the window.
    fn set_visible(&self, visible: bool);

    /// Re-apply window configuration.
    fn update(&self);

    /// Whether the window is currently shown.
    fn is_visible(&self) -> bool;

    /// Number of configuration refreshes applied so far.
    fn update_count(&self) -> u64;
}

/// Shared window handle.
pub type SharedWindow = Arc<dyn WindowPort>;
