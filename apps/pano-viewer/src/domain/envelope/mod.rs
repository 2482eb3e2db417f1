//! Envelope and Connection Types
//!
//! Every message pushed to a browser client is wrapped in an [`Envelope`]
//! tagged with the bus channel it came from, so clients can dispatch on
//! `type` without knowing anything about the bus.
//!
//! # Wire Shape
//!
//! ```json
//! {"type": "viewsync", "data": {"heading": 90.0, "tilt": 0.0}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Types
// =============================================================================

/// A tree-shaped message payload.
pub type Payload = Value;

/// Name of a bus channel (and of the envelope `type` it maps to).
pub type ChannelName = String;

/// Field carrying the message type on both bus payloads and client messages.
pub const TYPE_FIELD: &str = "type";

/// Field carrying the nested payload of a wrapped message.
pub const DATA_FIELD: &str = "data";

// =============================================================================
// Envelope
// =============================================================================

/// Typed wrapper around an outbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel the payload was relayed from.
    #[serde(rename = "type")]
    pub channel: ChannelName,
    /// The relayed payload.
    pub data: Payload,
}

impl Envelope {
    /// Wrap a payload for the given channel.
    #[must_use]
    pub fn new(channel: impl Into<ChannelName>, data: Payload) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }

    /// Serialize to the JSON text sent over the WebSocket.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Read the declared `type` of a payload, if it has a string one.
#[must_use]
pub fn declared_type(payload: &Payload) -> Option<&str> {
    payload.get(TYPE_FIELD).and_then(Value::as_str)
}

// =============================================================================
// Connection Identity
// =============================================================================

/// Opaque identifier of a connected real-time client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the ID as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
