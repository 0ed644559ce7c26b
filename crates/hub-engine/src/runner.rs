//! Rule runners
//!
//! One runner per active rule. It subscribes to the brokers of every sensor
//! the rule depends on, keeps the latest value of each in a snapshot, and
//! re-evaluates the condition whenever one of them changes. The rule's action
//! is emitted only when the outcome flips from false to true.

use hub_broker::{BrokerError, OutletId};
use hub_core::{Reading, RuleId, SensorId};
use hub_listener::Listener;
use hub_rules::{ConditionEvaluator, EvalContext, Rule, Snapshot, ValidRuleAction};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::multiplexer::{MuxEvent, Multiplexer};

/// Errors that prevent a runner from starting
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("rule {rule_id} depends on sensor {sensor_id}, which has no listener")]
    MissingDependency { rule_id: RuleId, sensor_id: SensorId },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Commands accepted by a running rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCommand {
    Stop,
}

/// An action emitted by a runner, queued for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAction {
    pub rule_id: RuleId,
    pub action: ValidRuleAction,
}

/// Turns a stream of outcomes into rising edges
///
/// The remembered outcome starts out false, so a rule that is already true
/// when its runner starts fires once.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    last: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome; returns true on a false to true transition
    pub fn observe(&mut self, outcome: bool) -> bool {
        let rising = outcome && !self.last;
        self.last = outcome;
        rising
    }

    pub fn last(&self) -> bool {
        self.last
    }
}

/// Owner's side of a running rule
#[derive(Debug)]
pub struct RunnerHandle {
    rule: Rule,
    commands: mpsc::UnboundedSender<RunnerCommand>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    pub fn rule_id(&self) -> RuleId {
        self.rule.id
    }

    /// The rule as it was when the runner started
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Ask the runner to stop; it unsubscribes before exiting
    pub fn stop(&self) {
        if self.commands.send(RunnerCommand::Stop).is_err() {
            trace!(rule_id = %self.rule.id, "Runner already gone");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the runner and wait until it has released its outlets
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(rule_id = %self.rule.id, error = %e, "Runner task failed");
        }
    }
}

struct Subscription {
    listener: Arc<Listener>,
    outlet: OutletId,
}

/// Evaluates one rule against live values
pub struct RuleRunner {
    rule: Rule,
    evaluator: Arc<ConditionEvaluator>,
    actions: mpsc::UnboundedSender<FiredAction>,
    snapshot: Snapshot,
    edge: EdgeDetector,
    subscriptions: Vec<Subscription>,
    mux: Multiplexer<SensorId, Reading, RunnerCommand>,
}

impl RuleRunner {
    /// Subscribe to every dependency and spawn the evaluation loop
    ///
    /// `resolve` maps a sensor to its listener. Every dependency must resolve
    /// or the rule is not started. The snapshot is seeded with each listener's
    /// latest value and the rule is evaluated once before waiting for changes.
    pub async fn start<F>(
        rule: Rule,
        resolve: F,
        evaluator: Arc<ConditionEvaluator>,
        actions: mpsc::UnboundedSender<FiredAction>,
    ) -> RunnerResult<RunnerHandle>
    where
        F: Fn(SensorId) -> Option<Arc<Listener>>,
    {
        let rule_id = rule.id;
        let handle_rule = rule.clone();
        let dependencies = rule.internal.dependencies();

        let mut listeners = Vec::with_capacity(dependencies.len());
        for sensor_id in dependencies {
            let listener =
                resolve(sensor_id).ok_or(RunnerError::MissingDependency { rule_id, sensor_id })?;
            listeners.push((sensor_id, listener));
        }

        let (commands, control) = mpsc::unbounded_channel();
        let mut runner = RuleRunner {
            rule,
            evaluator,
            actions,
            snapshot: Snapshot::new(),
            edge: EdgeDetector::new(),
            subscriptions: Vec::with_capacity(listeners.len()),
            mux: Multiplexer::new(control),
        };

        for (sensor_id, listener) in listeners {
            if let Some(value) = listener.latest().await {
                runner.snapshot.insert(sensor_id, value);
            }

            let outlet = match listener.subscribe().await {
                Ok(outlet) => outlet,
                Err(e) => {
                    runner.release().await;
                    return Err(e.into());
                }
            };
            runner.subscriptions.push(Subscription {
                listener,
                outlet: outlet.id(),
            });
            runner.mux.insert(sensor_id, outlet);
        }

        info!(
            rule_id = %rule_id,
            name = %runner.rule.name,
            dependencies = runner.subscriptions.len(),
            "Starting rule runner"
        );
        let task = tokio::spawn(runner.run());

        Ok(RunnerHandle {
            rule: handle_rule,
            commands,
            task,
        })
    }

    async fn run(mut self) {
        self.evaluate().await;

        loop {
            match self.mux.next().await {
                MuxEvent::Control(RunnerCommand::Stop) => {
                    debug!(rule_id = %self.rule.id, "Stop requested");
                    break;
                }
                MuxEvent::ControlClosed => {
                    debug!(rule_id = %self.rule.id, "Handle dropped");
                    break;
                }
                MuxEvent::Source(sensor_id, Reading::Online { values }) => {
                    let Some(value) = values.last().copied() else {
                        continue;
                    };
                    trace!(rule_id = %self.rule.id, %sensor_id, value, "Dependency updated");
                    self.snapshot.insert(sensor_id, value);
                    self.evaluate().await;
                }
                MuxEvent::Source(sensor_id, Reading::Offline) => {
                    trace!(rule_id = %self.rule.id, %sensor_id, "Dependency offline");
                }
                MuxEvent::SourceClosed(sensor_id) => {
                    warn!(
                        rule_id = %self.rule.id,
                        %sensor_id,
                        "Dependency stream closed, rule keeps running on its last value"
                    );
                }
            }
        }

        self.release().await;
        info!(rule_id = %self.rule.id, "Rule runner stopped");
    }

    async fn evaluate(&mut self) {
        let ctx = EvalContext::new(&self.snapshot);
        let outcome = match self.evaluator.evaluate(&self.rule.internal, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(rule_id = %self.rule.id, error = %e, "Evaluation failed");
                return;
            }
        };

        if self.edge.observe(outcome) {
            info!(rule_id = %self.rule.id, name = %self.rule.name, "Rule passed");
            let fired = FiredAction {
                rule_id: self.rule.id,
                action: self.rule.on_valid.clone(),
            };
            if self.actions.send(fired).is_err() {
                warn!(rule_id = %self.rule.id, "Action queue closed, dropping action");
            }
        }
    }

    /// Unsubscribe from every broker this runner joined
    async fn release(&mut self) {
        for sub in self.subscriptions.drain(..) {
            if let Err(e) = sub.listener.unsubscribe(sub.outlet).await {
                trace!(sensor_id = %sub.listener.sensor_id(), error = %e, "Unsubscribe skipped");
            }
        }
    }
}
