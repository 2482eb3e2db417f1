//! Rosbridge Client Integration Tests
//!
//! Runs the bus client against an in-process WebSocket server speaking the
//! rosbridge JSON protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use pano_viewer::application::ports::BusPort;
use pano_viewer::infrastructure::bus::BackoffConfig;
use pano_viewer::{BusClientConfig, BusEvent, RosbridgeClient};

const WAIT: Duration = Duration::from_secs(2);

fn config(addr: std::net::SocketAddr) -> BusClientConfig {
    BusClientConfig {
        subscriptions: vec!["viewsync".to_string()],
        advertisements: vec!["changepano".to_string()],
        message_type: Some("std_msgs/String".to_string()),
        reconnect: BackoffConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            ..BackoffConfig::default()
        }
        .without_jitter(),
        ..BusClientConfig::new(format!("ws://{addr}"))
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_op(server: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let frame = timeout(WAIT, server.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client went away")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn next_event(rx: &mut mpsc::Receiver<BusEvent>) -> BusEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a bus event")
        .expect("event channel closed")
}

#[tokio::test]
async fn handshake_inbound_and_publish() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let (client, publisher) = RosbridgeClient::new(config(addr), event_tx, cancel.clone());
    let status = client.status();
    let client_task = tokio::spawn(client.run());

    let mut server = accept(&listener).await;
    assert_eq!(
        next_op(&mut server).await,
        json!({ "op": "subscribe", "topic": "/viewsync" })
    );
    assert_eq!(
        next_op(&mut server).await,
        json!({ "op": "advertise", "topic": "/changepano", "type": "std_msgs/String" })
    );
    assert_eq!(next_event(&mut event_rx).await, BusEvent::Connected);
    assert!(status.is_connected());

    server
        .send(Message::text(
            json!({ "op": "publish", "topic": "/viewsync", "msg": { "heading": 10 } }).to_string(),
        ))
        .await
        .unwrap();
    server
        .send(Message::text(json!({ "op": "status", "level": "info" }).to_string()))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut event_rx).await,
        BusEvent::Message {
            channel: "viewsync".to_string(),
            payload: json!({ "heading": 10 }),
        }
    );
    assert_eq!(status.messages_received(), 1);

    publisher
        .publish("changepano", json!({ "fileurl": "http://host/p.jpg" }))
        .await
        .unwrap();
    assert_eq!(
        next_op(&mut server).await,
        json!({ "op": "publish", "topic": "/changepano", "msg": { "fileurl": "http://host/p.jpg" } })
    );

    cancel.cancel();
    timeout(WAIT, client_task).await.unwrap().unwrap().unwrap();
    assert!(!status.is_connected());
}

#[tokio::test]
async fn reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let (client, _publisher) = RosbridgeClient::new(config(addr), event_tx, cancel.clone());
    let status = client.status();
    let client_task = tokio::spawn(client.run());

    let first = accept(&listener).await;
    assert_eq!(next_event(&mut event_rx).await, BusEvent::Connected);
    drop(first);

    assert_eq!(next_event(&mut event_rx).await, BusEvent::Disconnected);
    assert_eq!(
        next_event(&mut event_rx).await,
        BusEvent::Reconnecting { attempt: 1 }
    );

    let mut second = accept(&listener).await;
    assert_eq!(
        next_op(&mut second).await,
        json!({ "op": "subscribe", "topic": "/viewsync" })
    );
    assert_eq!(next_event(&mut event_rx).await, BusEvent::Connected);
    assert_eq!(status.reconnect_attempts(), 0);

    cancel.cancel();
    timeout(WAIT, client_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = config(addr);
    config.reconnect.max_attempts = 2;

    let (event_tx, _event_rx) = mpsc::channel(16);
    let (client, _publisher) = RosbridgeClient::new(config, event_tx, CancellationToken::new());

    let result = timeout(WAIT, client.run()).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn zero_keepalive_interval_is_clamped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let zero_keepalive = BusClientConfig {
        keepalive_interval: Duration::ZERO,
        ..config(addr)
    };
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let (client, _publisher) = RosbridgeClient::new(zero_keepalive, event_tx, cancel.clone());
    let status = client.status();
    let client_task = tokio::spawn(client.run());

    let mut server = accept(&listener).await;
    assert_eq!(next_event(&mut event_rx).await, BusEvent::Connected);

    server
        .send(Message::text(
            json!({ "op": "publish", "topic": "/viewsync", "msg": { "heading": 3 } }).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut event_rx).await,
        BusEvent::Message {
            channel: "viewsync".to_string(),
            payload: json!({ "heading": 3 }),
        }
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(status.is_connected());

    cancel.cancel();
    timeout(WAIT, client_task).await.unwrap().unwrap().unwrap();
}
