//! Rosbridge Bus Adapter
//!
//! WebSocket client for a rosbridge v2 server: the relay's inbound source and
//! the [`BusPort`](crate::application::ports::BusPort) for client publishes.

pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod reconnect;

pub use client::{
    BusClientConfig, BusClientError, BusEvent, BusStatus, RosbridgeClient, RosbridgePublisher,
};
pub use dispatch::dispatch_bus_events;
pub use protocol::{ProtocolError, RosbridgeOp, TopicCodec};
pub use reconnect::{Backoff, BackoffConfig};
