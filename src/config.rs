//! Host configuration management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::bridge::{BridgeCodec, TopicFilter};
use crate::bus::OverflowPolicy;
use crate::error::{Error, Result};
use crate::metrics::MetricsConfig;

/// Main configuration for a plugin host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// Plugin registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Event bus configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Distributed bridge configuration.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// HTTP management API configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Plugin registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Upper bound for a single lifecycle hook, in milliseconds (0 = unbounded).
    pub hook_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hook_timeout_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    /// Hook timeout, `None` when unbounded.
    pub fn hook_timeout(&self) -> Option<Duration> {
        (self.hook_timeout_ms > 0).then(|| Duration::from_millis(self.hook_timeout_ms))
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of each subscriber's delivery queue.
    pub queue_capacity: usize,

    /// Behavior when a subscriber queue is full.
    pub overflow_policy: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::Block,
        }
    }
}

/// Distributed bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Whether to bridge the bus to a broker.
    pub enabled: bool,

    /// Identifier of this host on the broker. Frames carrying it are echoes.
    pub node_id: String,

    /// Topics to forward: exact names, `prefix.*` patterns, or `*` for all.
    pub topics: Vec<String>,

    /// Wire encoding of bridged events.
    pub codec: BridgeCodec,

    /// Capacity of the outbound queue between the bus and the broker.
    pub outbound_capacity: usize,

    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: format!("node-{}", uuid::Uuid::new_v4().simple()),
            topics: vec!["*".to_string()],
            codec: BridgeCodec::Json,
            outbound_capacity: 1024,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parsed topic filter.
    pub fn topic_filter(&self) -> TopicFilter {
        TopicFilter::new(self.topics.iter().cloned())
    }
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Initial delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,

    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,

    /// Maximum consecutive failed attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_attempts: 0, // unlimited
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based), with exponential backoff.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt.min(64) as i32);
        let clamped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(clamped as u64)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_attempt(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures < self.max_attempts
    }
}

/// HTTP management API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    pub listen_address: String,

    /// Enable CORS.
    #[serde(default)]
    pub cors_enabled: bool,

    /// Allowed CORS origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            cors_enabled: false,
            cors_origins: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.bus.queue_capacity == 0 {
            return Err(Error::Config(
                "bus.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.api.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "api.listen_address '{}' is not a socket address",
                self.api.listen_address
            )));
        }
        if self.metrics.prefix.trim().is_empty() {
            return Err(Error::Config("metrics.prefix must not be empty".to_string()));
        }

        if self.bridge.enabled {
            if self.bridge.node_id.trim().is_empty() {
                return Err(Error::Config(
                    "bridge.node_id must not be empty".to_string(),
                ));
            }
            if self.bridge.outbound_capacity == 0 {
                return Err(Error::Config(
                    "bridge.outbound_capacity must be greater than 0".to_string(),
                ));
            }
            if self.bridge.topics.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::Config(
                    "bridge.topics must not contain empty entries".to_string(),
                ));
            }
            if self.bridge.reconnect.backoff_multiplier < 1.0 {
                return Err(Error::Config(
                    "bridge.reconnect.backoff_multiplier must be at least 1.0".to_string(),
                ));
            }
        }
        Ok(())
    }
}
