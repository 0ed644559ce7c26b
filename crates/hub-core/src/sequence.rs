//! Timed action sequences

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{SensorId, SequenceId};

/// One step of a sequence: wait, then write a value to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceAction {
    /// Device receiving the value
    pub target: SensorId,

    /// Value written to the device
    pub value: f64,

    /// Delay before this step, in milliseconds
    #[serde(rename = "msDelay", default)]
    pub ms_delay: u64,
}

impl SequenceAction {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.ms_delay)
    }
}

/// An ordered list of timed device writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub actions: Vec<SequenceAction>,
}
