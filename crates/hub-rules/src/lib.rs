//! Rule conditions for the sensor hub
//!
//! This crate provides:
//! - The [`Condition`] tree and its JSON form
//! - Validation of conditions and rules
//! - Dependency extraction and evaluation against live values
//! - The [`Rule`] record and the [`RuleStore`] interface

pub mod condition;
pub mod day;
pub mod duration;
pub mod eval;
pub mod rule;

pub use condition::{
    AndCondition, Condition, ConditionError, ConditionResult, DayOfWeekCondition, NotCondition,
    OrCondition, PercentileCondition, ThresholdCondition, TimeOfDayCondition, TimeVariant,
};
pub use day::DaySchedule;
pub use eval::{ConditionEvaluator, EvalContext, Snapshot};
pub use rule::{ActionTarget, Rule, RuleError, RuleResult, RuleStore, ValidRuleAction};
