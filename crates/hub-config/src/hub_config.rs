//! Hub configuration
//!
//! Parses the hub's YAML file. Every section is optional and falls back to
//! the defaults the runtime uses when no file is given.

use hub_core::{Sensor, Sequence};
use hub_rules::Rule;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Listener tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSettings {
    /// Values kept in each listener's recency window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Cap on the polling backoff multiplier
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: u32,

    /// Deadline for one device request, in seconds
    #[serde(default = "default_sensor_timeout_secs")]
    pub sensor_timeout_secs: u64,
}

/// Broker tuning, applied to every broker the hub creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "default_outlet_capacity")]
    pub outlet_capacity: usize,

    /// How long a publish waits on a full outlet, in milliseconds
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,

    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

/// Persistence tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Deadline for one store call, in seconds
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,

    /// How long in-memory measurements are kept, in hours
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

/// Records loaded into the in-memory stores at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub sensors: Vec<Sensor>,

    #[serde(default)]
    pub sequences: Vec<Sequence>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Top-level hub configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub listener: ListenerSettings,

    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub seed: SeedData,
}

fn default_window_size() -> usize {
    hub_core::DEFAULT_WINDOW_SIZE
}

fn default_max_backoff_multiplier() -> u32 {
    32
}

fn default_sensor_timeout_secs() -> u64 {
    5
}

fn default_outlet_capacity() -> usize {
    16
}

fn default_handoff_timeout_ms() -> u64 {
    500
}

fn default_command_capacity() -> usize {
    64
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_retention_hours() -> u64 {
    24 * 7
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_backoff_multiplier: default_max_backoff_multiplier(),
            sensor_timeout_secs: default_sensor_timeout_secs(),
        }
    }
}

impl ListenerSettings {
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor_timeout_secs)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            outlet_capacity: default_outlet_capacity(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl BrokerSettings {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_store_timeout_secs(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

impl HubConfig {
    /// Load configuration from a YAML file
    ///
    /// Relative `!include` paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let yaml = load_yaml(path)?;

        let config = Self::from_yaml(yaml, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an already loaded YAML value
    pub fn from_yaml(yaml: Value, source: &Path) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(yaml).map_err(|e| ConfigError::Yaml {
            path: source.to_path_buf(),
            source: e,
        })
    }

    /// Check value ranges and seed records
    pub fn validate(&self) -> ConfigResult<()> {
        let zero_sizes = [
            ("listener.window_size", self.listener.window_size == 0),
            (
                "listener.max_backoff_multiplier",
                self.listener.max_backoff_multiplier == 0,
            ),
            ("broker.outlet_capacity", self.broker.outlet_capacity == 0),
            ("broker.command_capacity", self.broker.command_capacity == 0),
            ("store.retention_hours", self.store.retention_hours == 0),
        ];
        if let Some((field, _)) = zero_sizes.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::validation(*field, "must be at least 1"));
        }

        for sensor in &self.seed.sensors {
            if sensor.uri.is_empty() {
                return Err(ConfigError::validation(
                    format!("seed.sensors[{}].uri", sensor.id),
                    "must not be empty",
                ));
            }
        }

        for rule in &self.seed.rules {
            rule.validate()
                .map_err(|e| ConfigError::validation(format!("seed.rules[{}]", rule.id), e))?;
        }

        Ok(())
    }
}
