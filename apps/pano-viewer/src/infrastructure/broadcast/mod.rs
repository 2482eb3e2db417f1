//! Connection Hub
//!
//! Fan-out of relayed envelopes to connected WebSocket clients.
//!
//! # Architecture
//!
//! Each connection holds two receivers:
//! - a tokio broadcast receiver shared by all clients (relayed envelopes)
//! - a small per-connection mpsc queue for direct messages (the last
//!   view-sync envelope sent on connect)
//!
//! Slow clients lag on the broadcast channel; lagged envelopes are dropped
//! for that client only.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use crate::application::ports::ClientSink;
use crate::domain::envelope::{ConnectionId, Envelope};

/// Default broadcast channel capacity.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Capacity of each per-connection direct queue.
pub const DIRECT_QUEUE_CAPACITY: usize = 16;

// =============================================================================
// Subscription
// =============================================================================

/// Receivers handed to a newly connected client.
#[derive(Debug)]
pub struct ClientSubscription {
    /// Identifier assigned to the connection.
    pub id: ConnectionId,
    /// Envelopes broadcast to every client.
    pub broadcast_rx: broadcast::Receiver<Arc<Envelope>>,
    /// Envelopes addressed to this client only.
    pub direct_rx: mpsc::Receiver<Arc<Envelope>>,
}

// =============================================================================
// Hub
// =============================================================================

/// Registry of connected clients.
///
/// # Example
///
/// ```rust
/// use pano_viewer::infrastructure::broadcast::ConnectionHub;
///
/// let hub = ConnectionHub::with_defaults();
/// let subscription = hub.connect();
/// assert_eq!(hub.connection_count(), 1);
///
/// hub.disconnect(&subscription.id);
/// assert_eq!(hub.connection_count(), 0);
/// ```
#[derive(Debug)]
pub struct ConnectionHub {
    broadcast_tx: broadcast::Sender<Arc<Envelope>>,
    direct: RwLock<HashMap<ConnectionId, mpsc::Sender<Arc<Envelope>>>>,
}

impl ConnectionHub {
    /// Create a hub with the given broadcast capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            broadcast_tx: broadcast::channel(capacity.max(1)).0,
            direct: RwLock::new(HashMap::new()),
        }
    }

    /// Create a hub with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Register a new client.
    #[must_use]
    pub fn connect(&self) -> ClientSubscription {
        let id = ConnectionId::generate();
        let (direct_tx, direct_rx) = mpsc::channel(DIRECT_QUEUE_CAPACITY);
        let broadcast_rx = self.broadcast_tx.subscribe();

        self.direct.write().insert(id.clone(), direct_tx);
        tracing::debug!(connection = %id, "Client registered");

        ClientSubscription {
            id,
            broadcast_rx,
            direct_rx,
        }
    }

    /// Forget a client. Returns `false` if it was not registered.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        self.direct.write().remove(id).is_some()
    }

    /// Whether a client is registered.
    #[must_use]
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.direct.read().contains_key(id)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.direct.read().len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connection_count(),
            broadcast_receivers: self.broadcast_tx.receiver_count(),
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ClientSink for ConnectionHub {
    fn broadcast(&self, envelope: Arc<Envelope>) -> usize {
        // No receivers is not an error here.
        self.broadcast_tx.send(envelope).unwrap_or(0)
    }

    fn send_to(&self, connection: &ConnectionId, envelope: Arc<Envelope>) -> bool {
        let Some(tx) = self.direct.read().get(connection).cloned() else {
            return false;
        };

        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection = %connection, error = %e, "Direct send failed");
                false
            }
        }
    }

    fn remove(&self, connection: &ConnectionId) -> bool {
        self.disconnect(connection)
    }
}

/// Shared connection hub reference.
pub type SharedConnectionHub = Arc<ConnectionHub>;

/// Statistics about connected clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Live broadcast receivers.
    pub broadcast_receivers: usize,
}

// =============================================================================
// Tests
// =============================================================================
