//! Message Relay
//!
//! Bidirectional translation between bus channels and connected real-time
//! clients.
//!
//! # Bus → Clients
//!
//! 1. Look the channel up in the dispatch table (unregistered: ignored)
//! 2. Translate the payload into an [`Envelope`] (nested types unwrapped)
//! 3. If the channel is the view-sync channel, replace the last message
//! 4. Broadcast the envelope to every connected client
//!
//! # Clients → Bus
//!
//! Client messages declare a `type`. Known client channels are published on
//! the bus; anything else is dropped without telling the client.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::application::ports::{BusError, SharedBus, SharedClientSink};
use crate::domain::envelope::{
    ChannelName, ConnectionId, DATA_FIELD, Envelope, Payload, TYPE_FIELD, declared_type,
};
use crate::domain::translation::{DispatchTable, TranslationError, Translator, unwrapping};

/// Default view synchronization channel.
pub const DEFAULT_VIEWSYNC_CHANNEL: &str = "viewsync";

/// Default double-wrapped message type.
pub const DEFAULT_CHANGEPANO_TYPE: &str = "changepano";

// =============================================================================
// Settings
// =============================================================================

/// Relay behavior settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Channel whose last envelope is replayed to newly connected clients.
    pub view_sync_channel: ChannelName,
    /// Message type whose payload is nested one level under `data`.
    pub nested_type: String,
    /// Client message types that map to bus channels.
    pub client_channels: HashSet<ChannelName>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            view_sync_channel: DEFAULT_VIEWSYNC_CHANNEL.to_string(),
            nested_type: DEFAULT_CHANGEPANO_TYPE.to_string(),
            client_channels: HashSet::from([DEFAULT_CHANGEPANO_TYPE.to_string()]),
        }
    }
}

// =============================================================================
// Last Message Cell
// =============================================================================

/// Shared slot holding the most recent view-sync envelope.
///
/// Readers always see either the previous or the new envelope in full.
#[derive(Debug, Default)]
pub struct LastMessageCell {
    slot: RwLock<Option<Arc<Envelope>>>,
}

impl LastMessageCell {
    /// Create an empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current envelope, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<Envelope>> {
        self.slot.read().clone()
    }

    /// Replace the stored envelope.
    pub fn replace(&self, envelope: Arc<Envelope>) {
        *self.slot.write() = Some(envelope);
    }

    /// Empty the cell.
    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    /// Whether an envelope is stored.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of relaying one bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Envelope broadcast; `receivers` clients were connected.
    Broadcast {
        /// Number of clients the envelope was queued for.
        receivers: usize,
    },
    /// The channel has no registration.
    Unregistered,
    /// The payload could not be translated; nothing was broadcast.
    Rejected(TranslationError),
}

/// Result of handling one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutcome {
    /// Body published on the bus.
    Published {
        /// Channel it was published on.
        channel: ChannelName,
    },
    /// No bus channel for the declared type (or no type at all).
    Dropped {
        /// The declared type, if any.
        message_type: Option<String>,
    },
    /// The bus refused the publish.
    PublishFailed {
        /// Channel the publish targeted.
        channel: ChannelName,
        /// Why it failed.
        error: BusError,
    },
}

// =============================================================================
// Relay
// =============================================================================

/// Bus ⇄ client relay.
pub struct Relay {
    settings: RelaySettings,
    table: RwLock<DispatchTable>,
    last_message: Arc<LastMessageCell>,
    bus: SharedBus,
    clients: SharedClientSink,
}

impl Relay {
    /// Create a relay with no registered channels.
    #[must_use]
    pub fn new(
        settings: RelaySettings,
        last_message: Arc<LastMessageCell>,
        bus: SharedBus,
        clients: SharedClientSink,
    ) -> Self {
        Self {
            settings,
            table: RwLock::new(DispatchTable::new()),
            last_message,
            bus,
            clients,
        }
    }

    /// Relay settings.
    #[must_use]
    pub const fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// The shared last-message cell.
    #[must_use]
    pub const fn last_message(&self) -> &Arc<LastMessageCell> {
        &self.last_message
    }

    /// Rebroadcast messages from `channel` to all clients.
    ///
    /// Returns `true` if an earlier registration was replaced.
    pub fn register_channel(&self, channel: impl Into<ChannelName>) -> bool {
        self.register_channel_with(channel, unwrapping(self.settings.nested_type.clone()))
    }

    /// Rebroadcast messages from `channel` using a custom translator.
    pub fn register_channel_with(
        &self,
        channel: impl Into<ChannelName>,
        translator: Translator,
    ) -> bool {
        let channel = channel.into();
        let replaced = self.table.write().register(channel.clone(), translator);
        tracing::debug!(channel = %channel, replaced, "Relay channel registered");
        replaced
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn registered_channels(&self) -> Vec<ChannelName> {
        self.table.read().channels()
    }

    /// Handle a message received from the bus.
    pub fn on_bus_message(&self, channel: &str, payload: Payload) -> RelayOutcome {
        let Some(result) = self.table.read().dispatch(channel, payload) else {
            tracing::debug!(channel, "Ignoring message on unregistered channel");
            return RelayOutcome::Unregistered;
        };

        let envelope = match result {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                tracing::warn!(channel, error = %e, "Dropping untranslatable bus message");
                return RelayOutcome::Rejected(e);
            }
        };

        // Replace before broadcasting so a client connecting in between
        // still gets this envelope on connect.
        if channel == self.settings.view_sync_channel {
            self.last_message.replace(Arc::clone(&envelope));
        }

        let receivers = self.clients.broadcast(envelope);
        tracing::trace!(channel, receivers, "Bus message relayed");
        RelayOutcome::Broadcast { receivers }
    }

    /// Handle a message sent by a connected client.
    pub async fn on_client_message(
        &self,
        connection: &ConnectionId,
        message: Payload,
    ) -> ClientOutcome {
        let message_type = declared_type(&message).map(str::to_string);

        let Some(channel) = message_type
            .as_deref()
            .filter(|t| self.settings.client_channels.contains(*t))
            .map(str::to_string)
        else {
            tracing::debug!(
                connection = %connection,
                message_type = ?message_type,
                "Dropping client message with unknown type"
            );
            return ClientOutcome::Dropped { message_type };
        };

        match self.bus.publish(&channel, client_body(message)).await {
            Ok(()) => {
                tracing::debug!(connection = %connection, channel = %channel, "Client message published");
                ClientOutcome::Published { channel }
            }
            Err(error) => {
                tracing::warn!(
                    connection = %connection,
                    channel = %channel,
                    error = %error,
                    "Client message publish failed"
                );
                ClientOutcome::PublishFailed { channel, error }
            }
        }
    }

    /// Handle a newly connected client.
    ///
    /// Sends the last view-sync envelope to that client only. Returns `true`
    /// if one was sent.
    pub fn on_client_connected(&self, connection: &ConnectionId) -> bool {
        let Some(envelope) = self.last_message.get() else {
            return false;
        };

        let sent = self.clients.send_to(connection, envelope);
        if !sent {
            tracing::debug!(connection = %connection, "Could not deliver last message");
        }
        sent
    }

    /// Handle a client that went away.
    pub fn on_client_disconnected(&self, connection: &ConnectionId) {
        if self.clients.remove(connection) {
            tracing::debug!(connection = %connection, "Client removed");
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("settings", &self.settings)
            .field("table", &*self.table.read())
            .finish_non_exhaustive()
    }
}

/// Body published for a client message: its `data` if present, otherwise
/// the message without its `type` tag.
fn client_body(message: Payload) -> Payload {
    let Value::Object(mut fields) = message else {
        return message;
    };

    fields.remove(TYPE_FIELD);
    match fields.remove(DATA_FIELD) {
        Some(data) => data,
        None => Value::Object(fields),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockBusPort, MockClientSink};
    use crate::domain::translation::passthrough;

    fn relay_with(bus: MockBusPort, clients: MockClientSink) -> Relay {
        Relay::new(
            RelaySettings::default(),
            Arc::new(LastMessageCell::new()),
            Arc::new(bus),
            Arc::new(clients),
        )
    }

    fn idle_bus() -> MockBusPort {
        let mut bus = MockBusPort::new();
        bus.expect_publish().never();
        bus
    }

    #[test]
    fn registered_channel_broadcasts_unchanged_payload() {
        let payload = json!({"type": "viewsync", "heading": 45});
        let expected = Envelope::new("viewsync", payload.clone());

        let mut clients = MockClientSink::new();
        clients
            .expect_broadcast()
            .withf(move |env| **env == expected)
            .times(1)
            .return_const(2usize);

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("viewsync");

        assert_eq!(
            relay.on_bus_message("viewsync", payload),
            RelayOutcome::Broadcast { receivers: 2 }
        );
    }

    #[test]
    fn changepano_is_unwrapped_before_broadcast() {
        let expected = Envelope::new("pano", json!({"fileurl": "x.jpg"}));

        let mut clients = MockClientSink::new();
        clients
            .expect_broadcast()
            .withf(move |env| **env == expected)
            .times(1)
            .return_const(1usize);

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("pano");

        let outcome = relay.on_bus_message(
            "pano",
            json!({"type": "changepano", "data": {"fileurl": "x.jpg"}}),
        );
        assert_eq!(outcome, RelayOutcome::Broadcast { receivers: 1 });
    }

    #[test]
    fn changepano_without_data_is_not_broadcast() {
        let mut clients = MockClientSink::new();
        clients.expect_broadcast().never();

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("viewsync");

        let outcome = relay.on_bus_message("viewsync", json!({"type": "changepano"}));
        assert!(matches!(outcome, RelayOutcome::Rejected(_)));
        assert!(!relay.last_message().is_set());
    }

    #[test]
    fn unregistered_channel_is_ignored() {
        let mut clients = MockClientSink::new();
        clients.expect_broadcast().never();

        let relay = relay_with(idle_bus(), clients);
        assert_eq!(
            relay.on_bus_message("viewsync", json!({})),
            RelayOutcome::Unregistered
        );
    }

    #[test]
    fn viewsync_replaces_last_message() {
        let mut clients = MockClientSink::new();
        clients.expect_broadcast().times(2).return_const(0usize);

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("viewsync");

        relay.on_bus_message("viewsync", json!({"heading": 1}));
        relay.on_bus_message("viewsync", json!({"heading": 2}));

        let last = relay.last_message().get().unwrap();
        assert_eq!(*last, Envelope::new("viewsync", json!({"heading": 2})));
    }

    #[test]
    fn other_channels_leave_last_message_alone() {
        let mut clients = MockClientSink::new();
        clients.expect_broadcast().return_const(0usize);

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("pano");
        relay.on_bus_message("pano", json!({"fileurl": "a"}));

        assert!(relay.last_message().get().is_none());
    }

    #[test]
    fn reregistration_replaces_translator() {
        let payload = json!({"type": "changepano", "data": {"x": 1}});
        let expected = Envelope::new("pano", payload.clone());

        let mut clients = MockClientSink::new();
        clients
            .expect_broadcast()
            .withf(move |env| **env == expected)
            .times(1)
            .return_const(1usize);

        let relay = relay_with(idle_bus(), clients);
        assert!(!relay.register_channel("pano"));
        assert!(relay.register_channel_with("pano", passthrough()));
        assert_eq!(relay.registered_channels(), vec!["pano"]);

        relay.on_bus_message("pano", payload);
    }

    #[test]
    fn connect_without_last_message_sends_nothing() {
        let mut clients = MockClientSink::new();
        clients.expect_send_to().never();

        let relay = relay_with(idle_bus(), clients);
        assert!(!relay.on_client_connected(&ConnectionId::from("c1")));
    }

    #[test]
    fn connect_sends_last_message_to_that_client_only() {
        let connection = ConnectionId::from("c1");
        let expected = Envelope::new("viewsync", json!({"heading": 7}));

        let mut clients = MockClientSink::new();
        clients.expect_broadcast().times(1).return_const(0usize);
        let target = connection.clone();
        clients
            .expect_send_to()
            .withf(move |conn, env| *conn == target && **env == expected)
            .times(1)
            .return_const(true);

        let relay = relay_with(idle_bus(), clients);
        relay.register_channel("viewsync");
        relay.on_bus_message("viewsync", json!({"heading": 7}));

        assert!(relay.on_client_connected(&connection));
    }

    #[test]
    fn disconnect_removes_client() {
        let mut clients = MockClientSink::new();
        clients
            .expect_remove()
            .withf(|conn| conn.as_str() == "c1")
            .times(1)
            .return_const(true);

        let relay = relay_with(idle_bus(), clients);
        relay.on_client_disconnected(&ConnectionId::from("c1"));
    }

    #[tokio::test]
    async fn known_client_type_publishes_once() {
        let mut bus = MockBusPort::new();
        bus.expect_publish()
            .with(eq("changepano"), eq(json!({"fileurl": "b.jpg"})))
            .times(1)
            .returning(|_, _| Ok(()));

        let relay = relay_with(bus, MockClientSink::new());
        let outcome = relay
            .on_client_message(
                &ConnectionId::from("c1"),
                json!({"type": "changepano", "data": {"fileurl": "b.jpg"}}),
            )
            .await;

        assert_eq!(
            outcome,
            ClientOutcome::Published {
                channel: "changepano".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_client_type_is_dropped() {
        let relay = relay_with(idle_bus(), MockClientSink::new());

        let outcome = relay
            .on_client_message(&ConnectionId::from("c1"), json!({"type": "reboot"}))
            .await;
        assert_eq!(
            outcome,
            ClientOutcome::Dropped {
                message_type: Some("reboot".to_string())
            }
        );

        let outcome = relay
            .on_client_message(&ConnectionId::from("c1"), json!([1, 2]))
            .await;
        assert_eq!(outcome, ClientOutcome::Dropped { message_type: None });
    }

    #[tokio::test]
    async fn bus_failure_is_reported_not_raised() {
        let mut bus = MockBusPort::new();
        bus.expect_publish()
            .times(1)
            .returning(|_, _| Err(BusError::Disconnected));

        let relay = relay_with(bus, MockClientSink::new());
        let outcome = relay
            .on_client_message(&ConnectionId::from("c1"), json!({"type": "changepano"}))
            .await;

        assert_eq!(
            outcome,
            ClientOutcome::PublishFailed {
                channel: "changepano".to_string(),
                error: BusError::Disconnected,
            }
        );
    }

    #[test]
    fn client_body_prefers_data_field() {
        assert_eq!(
            client_body(json!({"type": "t", "data": [1]})),
            json!([1])
        );
        assert_eq!(
            client_body(json!({"type": "t", "fileurl": "a"})),
            json!({"fileurl": "a"})
        );
    }
}
