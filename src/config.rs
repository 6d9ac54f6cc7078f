//! Node configuration.
//!
//! Layered with the `config` crate. Priority (highest to lowest):
//! 1. Environment variables, `NETJAM__` prefix, `__` between sections
//!    (`NETJAM__BUS__WORKERS=8`, `NETJAM__SERVICE_NAME=orders`)
//! 2. Config file (TOML, YAML or JSON, picked by extension)
//! 3. Defaults
//!
//! ```toml
//! service_name = "orders"
//!
//! [store]
//! url = "redis://10.0.0.5:6379"
//!
//! [heartbeat]
//! interval_ms = 5000
//! ttl_ms = 8000
//!
//! [bus]
//! workers = 8
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::bus::{BusOptions, KEY_DELIMITER};
use crate::logging::LoggingConfig;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "NETJAM";

/// Separator between the prefix and nested keys in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything a node needs to join the fleet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Logical service this instance belongs to.
    pub service_name: String,
    pub store: StoreConfig,
    pub heartbeat: HeartbeatConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
    #[cfg(feature = "http")]
    pub http: HttpConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_name: "default".to_string(),
            store: StoreConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
            #[cfg(feature = "http")]
            http: HttpConfig::default(),
        }
    }
}

/// Key-value bus connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Must exceed `interval_ms`, or instances flap between live and dead.
    pub ttl_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            ttl_ms: 15_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Inbound processing and call defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub claim_ttl_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            poll_interval_ms: 100,
            claim_ttl_ms: 60_000,
            call_timeout_ms: 5_000,
        }
    }
}

/// HTTP transport.
#[cfg(feature = "http")]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

#[cfg(feature = "http")]
impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from an optional file plus environment overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: NodeConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bus cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::Invalid("service_name must not be empty".into()));
        }
        if self.service_name.contains(KEY_DELIMITER) {
            return Err(ConfigError::Invalid(format!(
                "service_name {:?} must not contain {KEY_DELIMITER:?}",
                self.service_name
            )));
        }
        if self.heartbeat.ttl_ms <= self.heartbeat.interval_ms {
            return Err(ConfigError::Invalid(format!(
                "heartbeat.ttl_ms ({}) must exceed heartbeat.interval_ms ({})",
                self.heartbeat.ttl_ms, self.heartbeat.interval_ms
            )));
        }
        if self.bus.workers == 0 {
            return Err(ConfigError::Invalid("bus.workers must be at least 1".into()));
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.queue_capacity must be at least 1".into(),
            ));
        }
        // Redis rejects `PX 0`, and an instantly expiring claim dedups nothing.
        if self.bus.claim_ttl_ms == 0 {
            return Err(ConfigError::Invalid("bus.claim_ttl_ms must be at least 1".into()));
        }
        if self.bus.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bus.call_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Bus tuning derived from this config.
    pub fn bus_options(&self) -> BusOptions {
        BusOptions::from(self)
    }
}

impl From<&NodeConfig> for BusOptions {
    fn from(config: &NodeConfig) -> Self {
        Self {
            workers: config.bus.workers,
            queue_capacity: config.bus.queue_capacity,
            poll_interval: Duration::from_millis(config.bus.poll_interval_ms),
            claim_ttl: Duration::from_millis(config.bus.claim_ttl_ms),
            call_timeout: Duration::from_millis(config.bus.call_timeout_ms),
            heartbeat_interval: config.heartbeat.interval(),
            heartbeat_ttl: config.heartbeat.ttl(),
        }
    }
}
