//! Application Services
//!
//! - [`relay`]: bus ⇄ client translation and the shared last-message cell
//! - [`activity`]: lifecycle orchestration over the relay and the window

pub mod activity;
pub mod relay;

pub use activity::Activity;
pub use relay::{ClientOutcome, LastMessageCell, Relay, RelayOutcome, RelaySettings};
