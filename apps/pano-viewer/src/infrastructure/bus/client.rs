//! Rosbridge WebSocket Client
//!
//! Keeps a connection to the rosbridge server open, subscribes to the relayed
//! channels, and forwards inbound messages as [`BusEvent`]s. Outbound
//! publishes are queued by [`RosbridgePublisher`] and written by the
//! connection loop.
//!
//! # Connection Loop
//!
//! 1. Connect, drop anything queued while disconnected
//! 2. Send `subscribe` for relayed channels, `advertise` for client channels
//! 3. Pump frames until the socket closes, keepalive times out, or shutdown
//! 4. On failure, back off and reconnect

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::protocol::{ProtocolError, RosbridgeOp, TopicCodec};
use super::reconnect::{Backoff, BackoffConfig};
use crate::application::ports::{BusError, BusPort};
use crate::domain::envelope::{ChannelName, Payload};

/// Capacity of the outbound publish queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Shortest keepalive interval used; `tokio::time::interval` rejects zero.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a bus connection.
#[derive(Debug, thiserror::Error)]
pub enum BusClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No traffic from the server within the keepalive window.
    #[error("keepalive timeout after {0:?}")]
    KeepaliveTimeout(Duration),

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted by the bus client.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Connected and subscribed.
    Connected,
    /// Connection lost.
    Disconnected,
    /// About to retry.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A message on a subscribed channel.
    Message {
        /// Channel it arrived on.
        channel: ChannelName,
        /// Message body.
        payload: Payload,
    },
    /// A recoverable error (malformed frame).
    Error(String),
}

// =============================================================================
// Status
// =============================================================================

/// Connection status shared with the publisher and the health endpoint.
#[derive(Debug, Default)]
pub struct BusStatus {
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl BusStatus {
    /// Create a disconnected status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the bus connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Consecutive failed connection attempts.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Messages received since startup.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        crate::infrastructure::metrics::set_bus_connected(connected);
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the rosbridge client.
#[derive(Debug, Clone)]
pub struct BusClientConfig {
    /// WebSocket URL of the rosbridge server.
    pub url: String,
    /// Topic naming.
    pub codec: TopicCodec,
    /// Channels to subscribe to.
    pub subscriptions: Vec<ChannelName>,
    /// Channels to advertise for publishing.
    pub advertisements: Vec<ChannelName>,
    /// Message type used in `advertise`; nothing is advertised without one.
    pub message_type: Option<String>,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Silence tolerated after a ping before the connection is dropped.
    pub keepalive_timeout: Duration,
}

impl BusClientConfig {
    /// Create a configuration with default timing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            codec: TopicCodec::default(),
            subscriptions: Vec::new(),
            advertisements: Vec::new(),
            message_type: None,
            reconnect: BackoffConfig::default(),
            keepalive_interval: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(20),
        }
    }

    /// Build from bus settings and the relay's channel lists.
    #[must_use]
    pub fn from_settings(
        settings: &crate::BusSettings,
        subscriptions: Vec<ChannelName>,
        advertisements: Vec<ChannelName>,
    ) -> Self {
        Self {
            url: settings.url.clone(),
            codec: TopicCodec::new(settings.topic_prefix.clone()),
            subscriptions,
            advertisements,
            message_type: settings.message_type.clone(),
            reconnect: BackoffConfig::from_bus_settings(settings),
            keepalive_interval: settings.keepalive_interval,
            keepalive_timeout: settings.keepalive_timeout,
        }
    }

    /// Ops sent right after connecting.
    #[must_use]
    pub fn handshake(&self) -> Vec<RosbridgeOp> {
        let subscribes = self
            .subscriptions
            .iter()
            .map(|channel| self.codec.subscribe(channel));

        let advertises = self.message_type.iter().flat_map(|msg_type| {
            self.advertisements
                .iter()
                .map(move |channel| self.codec.advertise(channel, msg_type))
        });

        subscribes.chain(advertises).collect()
    }
}

// =============================================================================
// Publisher
// =============================================================================

#[derive(Debug)]
struct OutboundMessage {
    channel: ChannelName,
    payload: Payload,
}

/// [`BusPort`] backed by the client's outbound queue.
#[derive(Debug, Clone)]
pub struct RosbridgePublisher {
    outbound_tx: mpsc::Sender<OutboundMessage>,
    status: Arc<BusStatus>,
}

#[async_trait]
impl BusPort for RosbridgePublisher {
    async fn publish(&self, channel: &str, payload: Payload) -> Result<(), BusError> {
        if !self.status.is_connected() {
            return Err(BusError::Disconnected);
        }

        self.outbound_tx
            .send(OutboundMessage {
                channel: channel.to_string(),
                payload,
            })
            .await
            .map_err(|_| BusError::QueueClosed)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Rosbridge WebSocket client.
pub struct RosbridgeClient {
    config: BusClientConfig,
    event_tx: mpsc::Sender<BusEvent>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    status: Arc<BusStatus>,
    cancel: CancellationToken,
}

impl RosbridgeClient {
    /// Create a client and the publisher that feeds it.
    #[must_use]
    pub fn new(
        config: BusClientConfig,
        event_tx: mpsc::Sender<BusEvent>,
        cancel: CancellationToken,
    ) -> (Self, RosbridgePublisher) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let status = Arc::new(BusStatus::new());

        let publisher = RosbridgePublisher {
            outbound_tx,
            status: Arc::clone(&status),
        };

        let client = Self {
            config,
            event_tx,
            outbound_rx,
            status,
            cancel,
        };

        (client, publisher)
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<BusStatus> {
        Arc::clone(&self.status)
    }

    /// Run the connection loop until cancelled or out of attempts.
    ///
    /// # Errors
    ///
    /// Returns [`BusClientError::MaxReconnectAttemptsExceeded`] when the
    /// reconnect budget is spent.
    pub async fn run(mut self) -> Result<(), BusClientError> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Bus client cancelled");
                return Ok(());
            }

            let result = self.connect_and_run(&mut backoff).await;
            self.status.set_connected(false);

            match result {
                Ok(()) => {
                    tracing::info!("Bus connection closed for shutdown");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %self.config.url, "Bus connection error");
                    let _ = self.event_tx.send(BusEvent::Disconnected).await;

                    let Some(delay) = backoff.next_delay() else {
                        return Err(BusClientError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = backoff.attempts();
                    self.status
                        .reconnect_attempts
                        .store(attempt, Ordering::Relaxed);
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to bus"
                    );
                    let _ = self.event_tx.send(BusEvent::Reconnecting { attempt }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Bus client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect and pump frames until error or cancellation.
    async fn connect_and_run(&mut self, backoff: &mut Backoff) -> Result<(), BusClientError> {
        tracing::info!(url = %self.config.url, "Connecting to bus");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            connected = tokio_tungstenite::connect_async(&self.config.url) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        let stale = self.drain_outbound();
        if stale > 0 {
            tracing::debug!(dropped = stale, "Dropped publishes queued while disconnected");
        }

        for op in self.config.handshake() {
            let frame = self.config.codec.encode(&op)?;
            write.send(Message::Text(frame.into())).await?;
        }

        backoff.reset();
        self.status.reconnect_attempts.store(0, Ordering::Relaxed);
        self.status.set_connected(true);
        tracing::info!(
            subscriptions = ?self.config.subscriptions,
            "Bus connected"
        );
        let _ = self.event_tx.send(BusEvent::Connected).await;

        let keepalive_interval = self.config.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL);
        let mut keepalive = tokio::time::interval(keepalive_interval);
        keepalive.tick().await;
        let mut last_seen = Instant::now();
        let silence_limit = keepalive_interval + self.config.keepalive_timeout;
        let mut outbound_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    if last_seen.elapsed() > silence_limit {
                        return Err(BusClientError::KeepaliveTimeout(silence_limit));
                    }
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                outbound = self.outbound_rx.recv(), if outbound_open => {
                    let Some(OutboundMessage { channel, payload }) = outbound else {
                        tracing::debug!("Bus publisher dropped");
                        outbound_open = false;
                        continue;
                    };
                    let frame = self.config.codec.encode(&self.config.codec.publish(&channel, payload))?;
                    write.send(Message::Text(frame.into())).await?;
                    tracing::trace!(channel = %channel, "Published to bus");
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Bus server sent close frame");
                            return Err(BusClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            last_seen = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Bus stream ended");
                            return Err(BusClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match self.config.codec.decode_message(text) {
            Ok(Some((channel, payload))) => {
                self.status.messages_received.fetch_add(1, Ordering::Relaxed);
                let _ = self
                    .event_tx
                    .send(BusEvent::Message { channel, payload })
                    .await;
            }
            Ok(None) => {
                tracing::trace!("Ignoring non-message bus frame");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed bus frame");
                let _ = self.event_tx.send(BusEvent::Error(e.to_string())).await;
            }
        }
    }

    fn drain_outbound(&mut self) -> usize {
        let mut dropped = 0;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl std::fmt::Debug for RosbridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosbridgeClient")
            .field("config", &self.config)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
