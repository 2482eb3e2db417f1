//! WebSocket Endpoint
//!
//! `GET /websocket` upgrades to the real-time channel. Each connection runs a
//! sender task (direct messages first, then broadcasts) and an input task
//! (client messages to the relay) until either ends or the server shuts down.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::AppState;
use crate::application::services::{ClientOutcome, Relay};
use crate::domain::envelope::{ConnectionId, Payload};
use crate::infrastructure::broadcast::ClientSubscription;
use crate::infrastructure::metrics::{self, ClientMessageOutcome};

/// `GET /websocket`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let activity_state = state.activity().state();
    if !activity_state.is_serving() {
        tracing::debug!(state = %activity_state, "Refusing WebSocket while not serving");
        return (StatusCode::SERVICE_UNAVAILABLE, "not serving").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let ClientSubscription {
        id,
        mut broadcast_rx,
        mut direct_rx,
    } = state.hub().connect();
    metrics::set_connected_clients(state.hub().connection_count());
    tracing::info!(connection = %id, "WebSocket client connected");

    let relay = Arc::clone(state.activity().relay());
    relay.on_client_connected(&id);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let sender_task = async {
        loop {
            let envelope = tokio::select! {
                biased;
                direct = direct_rx.recv() => match direct {
                    Some(envelope) => envelope,
                    None => break,
                },
                broadcast = broadcast_rx.recv() => match broadcast {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        metrics::record_envelopes_lagged(skipped);
                        tracing::warn!(connection = %id, skipped, "Client lagged behind broadcast");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize envelope");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let input_task = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => handle_client_text(&relay, &id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = sender_task => tracing::debug!(connection = %id, "Sender task ended"),
        () = input_task => tracing::debug!(connection = %id, "Input task ended"),
        () = state.shutdown().cancelled() => tracing::debug!(connection = %id, "Closing for shutdown"),
    }

    relay.on_client_disconnected(&id);
    metrics::set_connected_clients(state.hub().connection_count());
    tracing::info!(connection = %id, "WebSocket client disconnected");
}

async fn handle_client_text(relay: &Relay, id: &ConnectionId, text: &str) {
    let message: Payload = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "Dropping non-JSON client message");
            metrics::record_client_message(ClientMessageOutcome::Dropped);
            return;
        }
    };

    let outcome = match relay.on_client_message(id, message).await {
        ClientOutcome::Published { .. } => ClientMessageOutcome::Published,
        ClientOutcome::Dropped { .. } => ClientMessageOutcome::Dropped,
        ClientOutcome::PublishFailed { .. } => ClientMessageOutcome::Failed,
    };
    metrics::record_client_message(outcome);
}
