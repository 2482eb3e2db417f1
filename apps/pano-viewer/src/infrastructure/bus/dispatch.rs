//! Bus Event Dispatch
//!
//! Drains [`BusEvent`]s from the client and hands messages to the relay.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::client::BusEvent;
use crate::application::services::{Relay, RelayOutcome};
use crate::infrastructure::metrics::{self, BusMessageOutcome};

/// Handle bus events until the client drops its sender.
pub async fn dispatch_bus_events(mut rx: mpsc::Receiver<BusEvent>, relay: Arc<Relay>) {
    while let Some(event) = rx.recv().await {
        handle_event(&relay, event);
    }
    tracing::debug!("Bus event channel closed");
}

fn handle_event(relay: &Relay, event: BusEvent) {
    match event {
        BusEvent::Connected => tracing::info!("Bus connected"),
        BusEvent::Disconnected => tracing::warn!("Bus disconnected"),
        BusEvent::Reconnecting { attempt } => {
            metrics::record_bus_reconnect();
            tracing::info!(attempt, "Bus reconnecting");
        }
        BusEvent::Message { channel, payload } => {
            let outcome = match relay.on_bus_message(&channel, payload) {
                RelayOutcome::Broadcast { receivers } => {
                    metrics::record_envelopes_delivered(receivers);
                    BusMessageOutcome::Relayed
                }
                RelayOutcome::Unregistered => BusMessageOutcome::Unregistered,
                RelayOutcome::Rejected(_) => BusMessageOutcome::Rejected,
            };
            metrics::record_bus_message(outcome);
        }
        BusEvent::Error(msg) => tracing::warn!(error = %msg, "Bus error"),
    }
}
