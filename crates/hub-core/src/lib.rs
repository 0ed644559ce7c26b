//! Core types for the sensor hub
//!
//! This crate provides the fundamental types shared by every other hub crate:
//! identifiers, sensors and their readings, notifications, sequences, the
//! cooperative stop signal, and the store interfaces implemented by the
//! persistence layer.

mod ids;
mod notification;
mod sensor;
mod sequence;
mod stop;

pub mod store;

pub use ids::{RuleId, SensorId, SequenceId};
pub use notification::{Notification, NotificationLevel};
pub use sensor::{Reading, Sensor};
pub use sequence::{Sequence, SequenceAction};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use store::{MeasurementStore, SensorStore, SequenceStore, StoreError, StoreResult};

/// Number of values a listener keeps in its recency window
pub const DEFAULT_WINDOW_SIZE: usize = 5;
