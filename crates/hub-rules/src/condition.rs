//! Condition types
//!
//! A rule's condition is a tree of boolean nodes. Leaves compare live sensor
//! values or look at the calendar; inner nodes combine them. The tree is
//! stored as flat JSON objects discriminated by a `"type"` field.

use hub_core::{SensorId, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

use crate::day::DaySchedule;
use crate::rule::{RuleError, RuleResult};

/// Condition errors
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Missing value for sensor {0}")]
    MissingValue(SensorId),

    #[error("Measurement history error: {0}")]
    History(#[from] StoreError),

    #[error("Invalid condition configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Condition tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// All children must be true
    And(AndCondition),

    /// Any child must be true
    Or(OrCondition),

    /// Wrapped condition must be false
    Not(NotCondition),

    /// Sensor value strictly above a threshold
    #[serde(rename = "gt")]
    GreaterThan(ThresholdCondition),

    /// Sensor value strictly below a threshold
    #[serde(rename = "lt")]
    LessThan(ThresholdCondition),

    /// Sensor value at or above a percentile of its recent history
    #[serde(rename = "perc")]
    Percentile(PercentileCondition),

    /// Wall clock before or after a time of day
    #[serde(rename = "time")]
    TimeOfDay(TimeOfDayCondition),

    /// Calendar date on a schedule
    #[serde(rename = "day")]
    DayOfWeek(DayOfWeekCondition),
}

impl Condition {
    /// Create an AND condition
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(AndCondition { children })
    }

    /// Create an OR condition
    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(OrCondition { children })
    }

    /// Create a NOT condition
    pub fn not(wrapped: Condition) -> Self {
        Condition::Not(NotCondition {
            wrapped: Box::new(wrapped),
        })
    }

    pub fn greater_than(sensor_id: SensorId, value: f64) -> Self {
        Condition::GreaterThan(ThresholdCondition { sensor_id, value })
    }

    pub fn less_than(sensor_id: SensorId, value: f64) -> Self {
        Condition::LessThan(ThresholdCondition { sensor_id, value })
    }

    pub fn percentile(sensor_id: SensorId, duration: Duration, perc: u8) -> Self {
        Condition::Percentile(PercentileCondition {
            sensor_id,
            duration,
            perc,
        })
    }

    pub fn time_of_day(hour: u32, minute: u32, variant: TimeVariant) -> Self {
        Condition::TimeOfDay(TimeOfDayCondition {
            hour,
            minute,
            variant,
        })
    }

    /// Create a day condition from its `"days months weekdays"` text
    pub fn day(format: &str) -> ConditionResult<Self> {
        Ok(Condition::DayOfWeek(DayOfWeekCondition {
            format: DaySchedule::parse(format)?,
        }))
    }

    /// Decode and validate a condition tree from JSON text
    pub fn parse(json: &str) -> RuleResult<Self> {
        let condition: Condition = serde_json::from_str(json)?;
        condition.validate().map_err(RuleError::from)?;
        Ok(condition)
    }

    /// Decode and validate a condition tree from a JSON value
    pub fn from_value(value: serde_json::Value) -> RuleResult<Self> {
        let condition: Condition = serde_json::from_value(value)?;
        condition.validate().map_err(RuleError::from)?;
        Ok(condition)
    }

    /// Sensors this tree reads, deduplicated
    ///
    /// Computed once when a runner starts; the set never changes for the
    /// lifetime of that runner.
    pub fn dependencies(&self) -> BTreeSet<SensorId> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut BTreeSet<SensorId>) {
        match self {
            Condition::And(AndCondition { children }) | Condition::Or(OrCondition { children }) => {
                for child in children {
                    child.collect_dependencies(deps);
                }
            }
            Condition::Not(NotCondition { wrapped }) => wrapped.collect_dependencies(deps),
            Condition::GreaterThan(c) | Condition::LessThan(c) => {
                deps.insert(c.sensor_id);
            }
            Condition::Percentile(c) => {
                deps.insert(c.sensor_id);
            }
            Condition::TimeOfDay(_) | Condition::DayOfWeek(_) => {}
        }
    }

    /// Check structural and range constraints of the whole tree
    pub fn validate(&self) -> ConditionResult<()> {
        match self {
            Condition::And(AndCondition { children }) => validate_children("and", children),
            Condition::Or(OrCondition { children }) => validate_children("or", children),
            Condition::Not(NotCondition { wrapped }) => wrapped.validate(),
            Condition::GreaterThan(_) | Condition::LessThan(_) => Ok(()),
            Condition::Percentile(c) => {
                if !(1..=100).contains(&c.perc) {
                    return Err(ConditionError::InvalidConfig(
                        "perc must be between 1 and 100".into(),
                    ));
                }
                if c.duration.is_zero() {
                    return Err(ConditionError::InvalidConfig(
                        "perc duration must be larger than 0".into(),
                    ));
                }
                Ok(())
            }
            Condition::TimeOfDay(c) => {
                if c.hour > 23 {
                    return Err(ConditionError::InvalidConfig(
                        "hour must be between 0 and 23".into(),
                    ));
                }
                if c.minute > 59 {
                    return Err(ConditionError::InvalidConfig(
                        "minute must be between 0 and 59".into(),
                    ));
                }
                Ok(())
            }
            Condition::DayOfWeek(c) => c.format.validate(),
        }
    }
}

fn validate_children(kind: &str, children: &[Condition]) -> ConditionResult<()> {
    if children.is_empty() {
        return Err(ConditionError::InvalidConfig(format!(
            "{kind} must have at least one child"
        )));
    }
    children.iter().try_for_each(Condition::validate)
}

/// AND condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AndCondition {
    pub children: Vec<Condition>,
}

/// OR condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrCondition {
    pub children: Vec<Condition>,
}

/// NOT condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotCondition {
    pub wrapped: Box<Condition>,
}

/// Threshold comparison shared by `gt` and `lt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    pub sensor_id: SensorId,
    pub value: f64,
}

/// Percentile comparison against recorded history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileCondition {
    pub sensor_id: SensorId,

    /// Trailing window of history to consider
    #[serde(with = "crate::duration::go_duration")]
    pub duration: Duration,

    /// Percentile, 1 to 100
    pub perc: u8,
}

/// Where the configured time sits relative to now
///
/// `Before` holds once the configured time has passed today, `After` while it
/// is still ahead. Both are false during the configured minute itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeVariant {
    Before,
    After,
}

/// Time of day comparison, minute resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOfDayCondition {
    pub hour: u32,
    pub minute: u32,
    pub variant: TimeVariant,
}

/// Calendar schedule condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayOfWeekCondition {
    pub format: DaySchedule,
}
