//! Sensor records and the readings their listeners publish

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::SensorId;

/// A registered sensor device
///
/// Owned by the persistence layer; the hub only needs the id, the URI and the
/// refresh rate to build a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Unique identifier
    pub id: SensorId,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Host (and optional port) of the device, without scheme
    pub uri: String,

    /// Polling interval in seconds
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate: u64,

    /// Active sensors push their values to the hub instead of being polled
    #[serde(default)]
    pub active: bool,
}

fn default_refresh_rate() -> u64 {
    1
}

impl Sensor {
    /// Create a polled sensor
    pub fn new(uri: impl Into<String>, refresh_rate: u64) -> Self {
        Self {
            id: SensorId::new(),
            name: String::new(),
            uri: uri.into(),
            refresh_rate,
            active: false,
        }
    }

    /// Set the sensor name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the sensor as pushing its own values
    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    /// Base delay between two polls
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_rate)
    }
}

/// What a listener publishes after every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reading {
    /// The recency window, oldest value first
    Online { values: Vec<f64> },

    /// The device could not be reached
    Offline,
}

impl Reading {
    /// Newest value of the window, `None` when offline or empty
    pub fn latest(&self) -> Option<f64> {
        match self {
            Reading::Online { values } => values.last().copied(),
            Reading::Offline => None,
        }
    }

    /// Whether the device answered
    pub fn is_online(&self) -> bool {
        matches!(self, Reading::Online { .. })
    }
}
