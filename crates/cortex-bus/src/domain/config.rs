//! Bus configuration with validation.
//!
//! All values have defaults suitable for a single service; `from_env`
//! overlays `CORTEX_BUS_*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Complete bus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub broker: BrokerConfig,
    pub lifecycle: LifecycleConfig,
}

/// Event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Oldest events are evicted beyond this count (0 = unbounded).
    pub max_events: usize,
    /// Append-only JSON-lines journal; disabled when `None`.
    pub journal_path: Option<PathBuf>,
    /// Entries buffered for the journal writer before new ones are dropped.
    pub journal_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            journal_path: None,
            journal_queue_capacity: 1024,
        }
    }
}

/// How handlers of one event are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Every handler in its own task, joined before `publish` returns.
    #[default]
    Concurrent,
    /// One handler at a time, in dispatch order.
    Sequential,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
}

/// Broker bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Mirror events to the broker when a transport is attached.
    pub enabled: bool,
    /// Identity stamped on outbound events (metadata `origin`).
    pub node_id: String,
    /// Events waiting for the broker before new ones are dropped.
    pub outbound_queue_capacity: usize,
    /// Minimum delay between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Maximum wait for the outbound queue to drain on shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_id: format!("cortex-{}", uuid::Uuid::new_v4().simple()),
            outbound_queue_capacity: 1024,
            reconnect_interval_ms: 5_000,
            drain_timeout_ms: 2_000,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Start/stop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Maximum wait for in-flight publishes during `stop`.
    pub shutdown_timeout_ms: u64,
    /// Period of the dead-subscriber sweep (0 disables it).
    pub prune_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 5_000,
            prune_interval_ms: 30_000,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_ms > 0).then(|| Duration::from_millis(self.prune_interval_ms))
    }
}

impl BusConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.journal_queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "store.journal_queue_capacity",
            });
        }
        if self.broker.outbound_queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "broker.outbound_queue_capacity",
            });
        }
        if self.broker.node_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "broker.node_id",
                value: self.broker.node_id.clone(),
            });
        }
        if self.lifecycle.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "lifecycle.shutdown_timeout_ms",
            });
        }
        Ok(())
    }

    /// Defaults overlaid with environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CORTEX_BUS_MAX_EVENTS`: store history bound (default: 10000)
    /// - `CORTEX_BUS_JOURNAL_PATH`: journal file (default: none)
    /// - `CORTEX_BUS_DISPATCH_MODE`: `concurrent` or `sequential`
    /// - `CORTEX_BUS_BROKER_ENABLED`: mirror to broker (default: true)
    /// - `CORTEX_BUS_NODE_ID`: origin label for outbound events
    /// - `CORTEX_BUS_SHUTDOWN_TIMEOUT_MS`: stop drain limit (default: 5000)
    /// - `CORTEX_BUS_PRUNE_INTERVAL_MS`: dead-subscriber sweep (default: 30000)
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` when a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(max_events) = parse_var("CORTEX_BUS_MAX_EVENTS")? {
            config.store.max_events = max_events;
        }
        if let Ok(path) = env::var("CORTEX_BUS_JOURNAL_PATH") {
            if !path.trim().is_empty() {
                config.store.journal_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(mode) = env::var("CORTEX_BUS_DISPATCH_MODE") {
            config.dispatch.mode = match mode.trim().to_ascii_lowercase().as_str() {
                "concurrent" => DispatchMode::Concurrent,
                "sequential" => DispatchMode::Sequential,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "CORTEX_BUS_DISPATCH_MODE",
                        value: mode,
                    })
                }
            };
        }
        if let Ok(enabled) = env::var("CORTEX_BUS_BROKER_ENABLED") {
            config.broker.enabled = enabled.to_lowercase() != "false" && enabled != "0";
        }
        if let Ok(node_id) = env::var("CORTEX_BUS_NODE_ID") {
            config.broker.node_id = node_id;
        }
        if let Some(timeout) = parse_var("CORTEX_BUS_SHUTDOWN_TIMEOUT_MS")? {
            config.lifecycle.shutdown_timeout_ms = timeout;
        }
        if let Some(interval) = parse_var("CORTEX_BUS_PRUNE_INTERVAL_MS")? {
            config.lifecycle.prune_interval_ms = interval;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name,
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
