//! Pano Viewer Binary
//!
//! Starts the panorama viewer backend.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pano-viewer
//! ```
//!
//! # Environment Variables
//!
//! - `PANO_HTTP_PORT`: HTTP server port (default: 8088)
//! - `PANO_BUS_URL`: rosbridge WebSocket URL (default: ws://localhost:9090)
//! - `PANO_VIEWSYNC_CHANNEL`: View-sync channel (default: viewsync)
//! - `PANO_PROXY_PATH`: Proxy route (default: proxy)
//! - `PANO_PROXY_STATUS_MODE`: optimistic | deferred (default: optimistic)
//! - `PANO_AUTO_ACTIVATE`: Show the window right after start (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! See `ViewerConfig` for the full list.

use std::sync::Arc;
use std::time::Duration;

use pano_viewer::application::ports::{SharedBus, SharedClientSink, SharedWindow};
use pano_viewer::infrastructure::bus::dispatch_bus_events;
use pano_viewer::infrastructure::telemetry;
use pano_viewer::{
    Activity, AppState, BusClientConfig, BusEvent, ConnectionHub, HttpServer, LastMessageCell,
    Relay, RosbridgeClient, StreamingProxy, TrackedWindow, ViewerConfig, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the bus event channel.
const BUS_EVENT_CAPACITY: usize = 1024;

/// Grace period for in-flight work after shutdown is signalled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        otlp_export = telemetry_guard.exporting(),
        "Starting pano viewer"
    );

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ViewerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Client fan-out
    let hub = Arc::new(ConnectionHub::new(config.channels.broadcast_capacity));

    // Bus client and its publisher
    let (bus_tx, bus_rx) = mpsc::channel::<BusEvent>(BUS_EVENT_CAPACITY);
    let bus_config = BusClientConfig::from_settings(
        &config.bus,
        config.channels.subscriptions(),
        config.channels.client_channels.clone(),
    );
    let (bus_client, publisher) = RosbridgeClient::new(bus_config, bus_tx, shutdown_token.clone());
    let bus_status = bus_client.status();

    // Relay and activity
    let bus: SharedBus = Arc::new(publisher);
    let clients: SharedClientSink = hub.clone();
    let relay = Arc::new(Relay::new(
        config.channels.relay_settings(),
        Arc::new(LastMessageCell::new()),
        bus,
        clients,
    ));
    let window: SharedWindow = Arc::new(TrackedWindow::new(config.window.id.clone()));
    let activity = Arc::new(Activity::new(
        Arc::clone(&relay),
        window,
        config.channels.relay_channels.clone(),
    ));

    activity.configure()?;
    activity.start()?;
    if config.window.auto_activate {
        activity.activate()?;
    }

    // Streaming proxy and HTTP server
    let proxy = Arc::new(StreamingProxy::new(config.proxy.clone())?);
    let state = Arc::new(AppState::new(
        Arc::clone(&activity),
        hub,
        bus_status,
        proxy,
        shutdown_token.clone(),
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        config.proxy.path.clone(),
        state,
    );

    // Spawn bus event dispatch
    tokio::spawn(dispatch_bus_events(bus_rx, relay));

    // Spawn bus client
    let bus_task = tokio::spawn(async move {
        if let Err(e) = bus_client.run().await {
            tracing::error!(error = %e, "Bus client error");
        }
    });

    // Spawn HTTP server
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!(state = %activity.state(), "Pano viewer ready");

    await_shutdown(&activity, shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(bus_task, http_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Pano viewer stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ViewerConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        bus_url = %config.bus.url,
        view_sync_channel = %config.channels.view_sync_channel,
        proxy_path = %config.proxy.path,
        proxy_mode = config.proxy.status_mode.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        relay_channels = ?config.channels.relay_channels,
        client_channels = ?config.channels.client_channels,
        scratch_dir = %config.proxy.scratch_dir.display(),
        "Channel and proxy details"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then stop the activity.
#[allow(clippy::expect_used)]
async fn await_shutdown(activity: &Activity, shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    if let Err(e) = activity.stop() {
        tracing::warn!(error = %e, "Activity already stopped");
    }
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
