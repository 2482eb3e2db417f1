//! Configuration Module
//!
//! Environment-driven configuration for the viewer.

mod settings;

pub use settings::{
    BusSettings, ChannelSettings, ConfigError, ProxySettings, ProxyStatusMode, ServerSettings,
    ViewerConfig, WindowSettings,
};
