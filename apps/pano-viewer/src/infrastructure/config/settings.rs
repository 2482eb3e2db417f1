//! Viewer Configuration Settings
//!
//! Configuration types for the viewer, loaded from environment variables.
//! Unparseable numbers fall back to their defaults; unknown modes and empty
//! required values are errors.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::RelaySettings;
use crate::domain::envelope::ChannelName;

/// When the proxy commits its response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyStatusMode {
    /// 200 before the fetch; failures yield an empty body.
    #[default]
    Optimistic,
    /// Fetch first; failures map to 4xx/5xx.
    Deferred,
}

impl ProxyStatusMode {
    /// Parse a mode name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "optimistic" => Some(Self::Optimistic),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }

    /// Get the mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Deferred => "deferred",
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port serving WebSocket, proxy, health and metrics routes.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8088 }
    }
}

/// Rosbridge bus connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// WebSocket URL of the rosbridge server.
    pub url: String,
    /// Prefix turning a channel name into a topic.
    pub topic_prefix: String,
    /// Message type for `advertise` (none = do not advertise).
    pub message_type: Option<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Keepalive ping interval.
    pub keepalive_interval: Duration,
    /// Silence tolerated after a ping.
    pub keepalive_timeout: Duration,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9090".to_string(),
            topic_prefix: "/".to_string(),
            message_type: None,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            keepalive_interval: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(20),
        }
    }
}

/// Relay channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// View synchronization channel.
    pub view_sync_channel: ChannelName,
    /// Message type whose payload is nested under `data`.
    pub change_pano_type: String,
    /// Bus channels rebroadcast to clients.
    pub relay_channels: Vec<ChannelName>,
    /// Client message types published on the bus.
    pub client_channels: Vec<ChannelName>,
    /// Broadcast queue capacity per client.
    pub broadcast_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            view_sync_channel: "viewsync".to_string(),
            change_pano_type: "changepano".to_string(),
            relay_channels: vec!["viewsync".to_string()],
            client_channels: vec!["changepano".to_string()],
            broadcast_capacity: 1024,
        }
    }
}

impl ChannelSettings {
    /// Relay settings for these channels.
    #[must_use]
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            view_sync_channel: self.view_sync_channel.clone(),
            nested_type: self.change_pano_type.clone(),
            client_channels: self.client_channels.iter().cloned().collect::<HashSet<_>>(),
        }
    }

    /// Channels the bus client subscribes to: the view-sync channel first,
    /// then the other relayed channels.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<ChannelName> {
        let mut channels = vec![self.view_sync_channel.clone()];
        for channel in &self.relay_channels {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        channels
    }
}

/// Streaming proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Route path segment (`/<path>`).
    pub path: String,
    /// Directory for scratch files.
    pub scratch_dir: PathBuf,
    /// Chunk size when streaming the scratch file.
    pub buffer_size: usize,
    /// When the status is committed.
    pub status_mode: ProxyStatusMode,
    /// Fetch timeout (none = wait indefinitely).
    pub fetch_timeout: Option<Duration>,
    /// User agent sent upstream.
    pub user_agent: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            path: "proxy".to_string(),
            scratch_dir: std::env::temp_dir(),
            buffer_size: 1024 * 1024,
            status_mode: ProxyStatusMode::Optimistic,
            fetch_timeout: None,
            user_agent: concat!("pano-viewer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Window settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSettings {
    /// Identifier used in window logs.
    pub id: String,
    /// Activate right after start.
    pub auto_activate: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            auto_activate: false,
        }
    }
}

/// Complete viewer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewerConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Bus connection settings.
    pub bus: BusSettings,
    /// Relay channel settings.
    pub channels: ChannelSettings,
    /// Streaming proxy settings.
    pub proxy: ProxySettings,
    /// Window settings.
    pub window: WindowSettings,
}

impl ViewerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let server = ServerSettings {
            http_port: env.parsed("PANO_HTTP_PORT", ServerSettings::default().http_port),
        };

        let bus_defaults = BusSettings::default();
        let bus = BusSettings {
            url: env.non_empty("PANO_BUS_URL")?.unwrap_or(bus_defaults.url),
            topic_prefix: env
                .string("PANO_BUS_TOPIC_PREFIX")
                .unwrap_or(bus_defaults.topic_prefix),
            message_type: env.non_empty("PANO_BUS_MESSAGE_TYPE")?,
            reconnect_delay_initial: env.millis(
                "PANO_BUS_RECONNECT_DELAY_INITIAL_MS",
                bus_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "PANO_BUS_RECONNECT_DELAY_MAX_SECS",
                bus_defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: env.parsed(
                "PANO_BUS_MAX_RECONNECT_ATTEMPTS",
                bus_defaults.max_reconnect_attempts,
            ),
            keepalive_interval: env.nonzero_secs(
                "PANO_BUS_KEEPALIVE_INTERVAL_SECS",
                bus_defaults.keepalive_interval,
            )?,
            keepalive_timeout: env.secs(
                "PANO_BUS_KEEPALIVE_TIMEOUT_SECS",
                bus_defaults.keepalive_timeout,
            ),
        };

        let channel_defaults = ChannelSettings::default();
        let view_sync_channel = env
            .non_empty("PANO_VIEWSYNC_CHANNEL")?
            .unwrap_or(channel_defaults.view_sync_channel);
        let change_pano_type = env
            .non_empty("PANO_CHANGEPANO_TYPE")?
            .unwrap_or(channel_defaults.change_pano_type);
        let channels = ChannelSettings {
            relay_channels: env
                .list("PANO_RELAY_CHANNELS")
                .unwrap_or_else(|| vec![view_sync_channel.clone()]),
            client_channels: env
                .list("PANO_CLIENT_CHANNELS")
                .unwrap_or_else(|| vec![change_pano_type.clone()]),
            broadcast_capacity: env.parsed(
                "PANO_BROADCAST_CAPACITY",
                channel_defaults.broadcast_capacity,
            ),
            view_sync_channel,
            change_pano_type,
        };

        let proxy_defaults = ProxySettings::default();
        let proxy = ProxySettings {
            path: match env.string("PANO_PROXY_PATH") {
                Some(raw) => normalize_route(&raw)
                    .ok_or_else(|| ConfigError::EmptyValue("PANO_PROXY_PATH".to_string()))?,
                None => proxy_defaults.path,
            },
            scratch_dir: env
                .non_empty("PANO_PROXY_SCRATCH_DIR")?
                .map_or(proxy_defaults.scratch_dir, PathBuf::from),
            buffer_size: match env.parsed("PANO_PROXY_BUFFER_SIZE", proxy_defaults.buffer_size) {
                0 => {
                    return Err(ConfigError::InvalidValue {
                        key: "PANO_PROXY_BUFFER_SIZE".to_string(),
                        value: "0".to_string(),
                    });
                }
                size => size,
            },
            status_mode: match env.string("PANO_PROXY_STATUS_MODE") {
                Some(raw) => ProxyStatusMode::parse(&raw).ok_or(ConfigError::InvalidValue {
                    key: "PANO_PROXY_STATUS_MODE".to_string(),
                    value: raw,
                })?,
                None => proxy_defaults.status_mode,
            },
            fetch_timeout: Some(env.secs("PANO_PROXY_FETCH_TIMEOUT_SECS", Duration::ZERO))
                .filter(|timeout| !timeout.is_zero()),
            user_agent: env
                .non_empty("PANO_PROXY_USER_AGENT")?
                .unwrap_or(proxy_defaults.user_agent),
        };

        let window = WindowSettings {
            id: env
                .non_empty("PANO_WINDOW_ID")?
                .unwrap_or_else(|| WindowSettings::default().id),
            auto_activate: env.flag("PANO_AUTO_ACTIVATE"),
        };

        Ok(Self {
            server,
            bus,
            channels,
            proxy,
            window,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its domain.
    #[error("invalid value '{value}' for environment variable {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Route segment without surrounding slashes.
fn normalize_route(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Value if set; error if set but blank.
    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.string(key) {
            Some(value) if value.trim().is_empty() => {
                Err(ConfigError::EmptyValue(key.to_string()))
            }
            other => Ok(other.map(|value| value.trim().to_string())),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    /// Like [`Self::secs`], but an explicit `0` is an error.
    fn nonzero_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let secs = self.secs(key, default);
        if secs.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            });
        }
        Ok(secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.string(key).is_some_and(|v| {
            matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        })
    }

    /// Comma-separated names, trimmed and de-duplicated in order.
    fn list(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.string(key)?;
        let mut items: Vec<String> = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !items.iter().any(|existing| existing == item) {
                items.push(item.to_string());
            }
        }
        (!items.is_empty()).then_some(items)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ViewerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ViewerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.http_port, 8088);
        assert_eq!(config.bus.url, "ws://localhost:9090");
        assert_eq!(config.bus.topic_prefix, "/");
        assert_eq!(config.bus.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(config.channels.relay_channels, vec!["viewsync"]);
        assert_eq!(config.channels.client_channels, vec!["changepano"]);
        assert_eq!(config.channels.broadcast_capacity, 1024);
        assert_eq!(config.proxy.path, "proxy");
        assert_eq!(config.proxy.buffer_size, 1_048_576);
        assert_eq!(config.proxy.status_mode, ProxyStatusMode::Optimistic);
        assert_eq!(config.proxy.fetch_timeout, None);
        assert!(!config.window.auto_activate);
    }

    #[test]
    fn channel_lists_are_trimmed_and_deduplicated() {
        let config = config_from(&[
            ("PANO_RELAY_CHANNELS", " viewsync, pano ,,viewsync "),
            ("PANO_CLIENT_CHANNELS", "changepano,reset"),
        ])
        .unwrap();
        assert_eq!(config.channels.relay_channels, vec!["viewsync", "pano"]);
        assert_eq!(config.channels.client_channels, vec!["changepano", "reset"]);
    }

    #[test]
    fn renamed_channels_flow_into_defaults() {
        let config = config_from(&[
            ("PANO_VIEWSYNC_CHANNEL", "sync"),
            ("PANO_CHANGEPANO_TYPE", "swap"),
        ])
        .unwrap();
        assert_eq!(config.channels.relay_channels, vec!["sync"]);
        assert_eq!(config.channels.client_channels, vec!["swap"]);

        let relay = config.channels.relay_settings();
        assert_eq!(relay.view_sync_channel, "sync");
        assert_eq!(relay.nested_type, "swap");
        assert!(relay.client_channels.contains("swap"));
    }

    #[test]
    fn subscriptions_lead_with_view_sync() {
        let settings = ChannelSettings {
            relay_channels: vec!["pano".to_string(), "viewsync".to_string()],
            ..ChannelSettings::default()
        };
        assert_eq!(settings.subscriptions(), vec!["viewsync", "pano"]);
    }

    #[test_case("optimistic", ProxyStatusMode::Optimistic)]
    #[test_case("DEFERRED", ProxyStatusMode::Deferred)]
    #[test_case(" deferred ", ProxyStatusMode::Deferred)]
    fn status_mode_parsing(raw: &str, expected: ProxyStatusMode) {
        let config = config_from(&[("PANO_PROXY_STATUS_MODE", raw)]).unwrap();
        assert_eq!(config.proxy.status_mode, expected);
    }

    #[test]
    fn unknown_status_mode_is_rejected() {
        let err = config_from(&[("PANO_PROXY_STATUS_MODE", "eager")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "PANO_PROXY_STATUS_MODE".to_string(),
                value: "eager".to_string(),
            }
        );
    }

    #[test_case("/proxy/", "proxy")]
    #[test_case("images", "images")]
    #[test_case(" /fetch ", "fetch")]
    fn proxy_path_is_normalized(raw: &str, expected: &str) {
        let config = config_from(&[("PANO_PROXY_PATH", raw)]).unwrap();
        assert_eq!(config.proxy.path, expected);
    }

    #[test]
    fn blank_values_are_rejected() {
        assert_eq!(
            config_from(&[("PANO_PROXY_PATH", "//")]).unwrap_err(),
            ConfigError::EmptyValue("PANO_PROXY_PATH".to_string())
        );
        assert_eq!(
            config_from(&[("PANO_BUS_URL", "  ")]).unwrap_err(),
            ConfigError::EmptyValue("PANO_BUS_URL".to_string())
        );
    }

    #[test_case("PANO_PROXY_BUFFER_SIZE" ; "buffer size")]
    #[test_case("PANO_BUS_KEEPALIVE_INTERVAL_SECS" ; "keepalive interval")]
    fn zero_is_rejected(key: &str) {
        assert_eq!(
            config_from(&[(key, "0")]).unwrap_err(),
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            }
        );
    }

    #[test]
    fn keepalive_overrides() {
        let config = config_from(&[
            ("PANO_BUS_KEEPALIVE_INTERVAL_SECS", "5"),
            ("PANO_BUS_KEEPALIVE_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.bus.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.bus.keepalive_timeout, Duration::ZERO);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = config_from(&[
            ("PANO_HTTP_PORT", "eighty"),
            ("PANO_PROXY_BUFFER_SIZE", "-4"),
        ])
        .unwrap();
        assert_eq!(config.server.http_port, 8088);
        assert_eq!(config.proxy.buffer_size, 1_048_576);
    }

    #[test]
    fn fetch_timeout_zero_means_none() {
        let config = config_from(&[("PANO_PROXY_FETCH_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(config.proxy.fetch_timeout, None);

        let config = config_from(&[("PANO_PROXY_FETCH_TIMEOUT_SECS", "15")]).unwrap();
        assert_eq!(config.proxy.fetch_timeout, Some(Duration::from_secs(15)));
    }

    #[test_case("true", true)]
    #[test_case("1", true)]
    #[test_case("On", true)]
    #[test_case("false", false)]
    #[test_case("nope", false)]
    fn auto_activate_flag(raw: &str, expected: bool) {
        let config = config_from(&[("PANO_AUTO_ACTIVATE", raw)]).unwrap();
        assert_eq!(config.window.auto_activate, expected);
    }

    #[test]
    fn window_id_override() {
        let config = config_from(&[("PANO_WINDOW_ID", "pano-left")]).unwrap();
        assert_eq!(config.window.id, "pano-left");
    }
}
