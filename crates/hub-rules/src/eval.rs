//! Condition evaluation logic
//!
//! Conditions are evaluated against a snapshot holding the latest value of
//! every sensor the tree depends on. Percentile nodes additionally query the
//! measurement history, which is passed to the evaluator explicitly.

use chrono::{DateTime, Local, Timelike};
use futures::future::BoxFuture;
use futures::FutureExt;
use hub_core::store::{bounded, DEFAULT_STORE_TIMEOUT};
use hub_core::{MeasurementStore, SensorId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::condition::{
    AndCondition, Condition, ConditionError, ConditionResult, DayOfWeekCondition, NotCondition,
    OrCondition, PercentileCondition, ThresholdCondition, TimeOfDayCondition, TimeVariant,
};

/// Latest known value per sensor
pub type Snapshot = HashMap<SensorId, f64>;

/// Context for condition evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Latest values of the tree's dependencies
    pub snapshot: &'a Snapshot,

    /// Override for current time (for testing)
    pub time_override: Option<DateTime<Local>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            time_override: None,
        }
    }

    /// Set time override for testing
    pub fn with_time(mut self, time: DateTime<Local>) -> Self {
        self.time_override = Some(time);
        self
    }

    /// Get current time (or override if set)
    pub fn now(&self) -> DateTime<Local> {
        self.time_override.unwrap_or_else(Local::now)
    }

    fn value(&self, sensor_id: SensorId) -> ConditionResult<f64> {
        self.snapshot
            .get(&sensor_id)
            .copied()
            .ok_or(ConditionError::MissingValue(sensor_id))
    }
}

/// Evaluates condition trees
pub struct ConditionEvaluator {
    history: Arc<dyn MeasurementStore>,
    store_timeout: Duration,
}

impl ConditionEvaluator {
    pub fn new(history: Arc<dyn MeasurementStore>) -> Self {
        Self {
            history,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound history queries by a custom deadline
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Evaluate a condition
    ///
    /// Any node failing makes the whole evaluation fail; no default outcome
    /// is substituted for a missing value.
    pub fn evaluate<'a>(
        &'a self,
        condition: &'a Condition,
        ctx: &'a EvalContext<'a>,
    ) -> BoxFuture<'a, ConditionResult<bool>> {
        async move {
            let result = match condition {
                Condition::And(c) => self.eval_and(c, ctx).await,
                Condition::Or(c) => self.eval_or(c, ctx).await,
                Condition::Not(c) => self.eval_not(c, ctx).await,
                Condition::GreaterThan(c) => eval_greater_than(c, ctx),
                Condition::LessThan(c) => eval_less_than(c, ctx),
                Condition::Percentile(c) => self.eval_percentile(c, ctx).await,
                Condition::TimeOfDay(c) => Ok(eval_time_of_day(c, ctx)),
                Condition::DayOfWeek(c) => Ok(eval_day(c, ctx)),
            };
            trace!(?result, "Condition evaluated");
            result
        }
        .boxed()
    }

    async fn eval_and(&self, c: &AndCondition, ctx: &EvalContext<'_>) -> ConditionResult<bool> {
        for child in &c.children {
            if !self.evaluate(child, ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn eval_or(&self, c: &OrCondition, ctx: &EvalContext<'_>) -> ConditionResult<bool> {
        for child in &c.children {
            if self.evaluate(child, ctx).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn eval_not(&self, c: &NotCondition, ctx: &EvalContext<'_>) -> ConditionResult<bool> {
        Ok(!self.evaluate(&c.wrapped, ctx).await?)
    }

    async fn eval_percentile(
        &self,
        c: &PercentileCondition,
        ctx: &EvalContext<'_>,
    ) -> ConditionResult<bool> {
        let current = ctx.value(c.sensor_id)?;
        let threshold = bounded(
            self.store_timeout,
            self.history.get_percentile(c.sensor_id, c.duration, c.perc),
        )
        .await?;
        trace!(sensor_id = %c.sensor_id, current, threshold, "Percentile check");
        Ok(current >= threshold)
    }
}

fn eval_greater_than(c: &ThresholdCondition, ctx: &EvalContext<'_>) -> ConditionResult<bool> {
    Ok(ctx.value(c.sensor_id)? > c.value)
}

fn eval_less_than(c: &ThresholdCondition, ctx: &EvalContext<'_>) -> ConditionResult<bool> {
    Ok(ctx.value(c.sensor_id)? < c.value)
}

fn eval_time_of_day(c: &TimeOfDayCondition, ctx: &EvalContext<'_>) -> bool {
    let now = ctx.now();
    let current = (now.hour(), now.minute());
    let target = (c.hour, c.minute);
    match c.variant {
        TimeVariant::Before => target < current,
        TimeVariant::After => target > current,
    }
}

fn eval_day(c: &DayOfWeekCondition, ctx: &EvalContext<'_>) -> bool {
    c.format.matches(ctx.now().date_naive())
}
