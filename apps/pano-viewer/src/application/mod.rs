//! Application Layer - Use cases and port definitions.
//!
//! The relay and the activity lifecycle live here. They talk to the bus,
//! the connected clients and the window only through the traits in
//! [`ports`].

/// Port interfaces for the bus, client fan-out and window management.
pub mod ports;

/// Relay and activity lifecycle services.
pub mod services;
