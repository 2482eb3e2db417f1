//! Domain Layer - Message envelopes, translation rules and lifecycle states.
//!
//! This layer has no knowledge of the bus transport, the HTTP server or the
//! window manager. Everything here is plain data plus pure functions over
//! `serde_json::Value` payloads.

/// Outbound envelopes, payloads and connection identifiers.
pub mod envelope;

/// Activity lifecycle states and transitions.
pub mod lifecycle;

/// Bus-to-client translation rules and the channel dispatch table.
pub mod translation;
