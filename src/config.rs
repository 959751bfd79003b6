//! Exporter configuration.
//!
//! The device address and adapter are validated before any Bluetooth
//! traffic happens; a bad value stops the process at startup instead of
//! surfacing as a metric.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default interval during which device results are cached.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(120);
/// Default Bluetooth adapter.
pub const DEFAULT_ADAPTER: &str = "hci0";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 9294;

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("need to provide a device address")]
    MissingDeviceAddress,
    #[error("need to provide a bluetooth adapter")]
    MissingAdapter,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Validated collector settings. Immutable once constructed.
///
/// A zero cache duration is accepted; it makes every scrape refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    device_address: String,
    adapter: String,
    cache_duration: Duration,
}

impl CollectorConfig {
    /// Creates a configuration, rejecting an empty device address or adapter.
    pub fn new(
        device_address: impl Into<String>,
        adapter: impl Into<String>,
        cache_duration: Duration,
    ) -> Result<Self, ConfigError> {
        let device_address = device_address.into();
        let adapter = adapter.into();

        if device_address.trim().is_empty() {
            return Err(ConfigError::MissingDeviceAddress);
        }
        if adapter.trim().is_empty() {
            return Err(ConfigError::MissingAdapter);
        }

        Ok(Self {
            device_address,
            adapter,
            cache_duration,
        })
    }

    /// MAC address of the Flower Care device, as configured.
    pub fn device_address(&self) -> &str {
        &self.device_address
    }

    /// Bluetooth adapter used for communication.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Interval during which device results are cached.
    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Device section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// MAC address of the Flower Care device.
    pub address: String,
    /// Bluetooth adapter to use for communication.
    pub adapter: String,
    /// Interval during which device results are cached, in seconds.
    pub cache_duration_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            adapter: DEFAULT_ADAPTER.to_string(),
            cache_duration_secs: DEFAULT_CACHE_DURATION.as_secs(),
        }
    }
}

/// HTTP server section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on for connections.
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the device section into a collector configuration.
    pub fn collector_config(&self) -> Result<CollectorConfig, ConfigError> {
        CollectorConfig::new(
            self.device.address.clone(),
            self.device.adapter.clone(),
            Duration::from_secs(self.device.cache_duration_secs),
        )
    }
}
