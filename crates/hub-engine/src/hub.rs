//! Hub orchestration
//!
//! The [`Hub`] owns the listener and runner registries, the notification
//! broker and the action dispatcher, and keeps them consistent as sensors
//! and rules come and go.

use chrono::Utc;
use dashmap::DashMap;
use hub_broker::{Broker, BrokerError, BrokerOptions};
use hub_config::HubConfig;
use hub_core::store::{bounded, DEFAULT_STORE_TIMEOUT};
use hub_core::{
    stop_channel, MeasurementStore, Notification, RuleId, Sensor, SensorId, SensorStore,
    SequenceStore, StopHandle, StoreError,
};
use hub_listener::{
    HttpValueSource, Listener, ListenerError, ListenerOptions, OnNewValue, ValueSource,
    DEFAULT_SENSOR_TIMEOUT,
};
use hub_rules::{ConditionEvaluator, Rule, RuleError, RuleStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceClient, HttpDeviceClient};
use crate::dispatcher::Dispatcher;
use crate::runner::{FiredAction, RuleRunner, RunnerError, RunnerHandle};
use crate::sequence::{HttpSequenceExecutor, SequenceExecutor};
use crate::session::{ListenerLookup, LiveSession, SessionHandle};

/// Hub errors
#[derive(Debug, Error)]
pub enum HubError {
    #[error("no listener registered for sensor {0}")]
    UnknownSensor(SensorId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Runtime tuning of a hub
#[derive(Debug, Clone, Copy)]
pub struct HubOptions {
    pub listener: ListenerOptions,
    /// Options of the notification broker
    pub notifications: BrokerOptions,
    pub sensor_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            listener: ListenerOptions::default(),
            notifications: BrokerOptions::default(),
            sensor_timeout: DEFAULT_SENSOR_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl HubOptions {
    pub fn from_config(config: &HubConfig) -> Self {
        let broker = BrokerOptions {
            outlet_capacity: config.broker.outlet_capacity,
            handoff_timeout: config.broker.handoff_timeout(),
            command_capacity: config.broker.command_capacity,
        };
        Self {
            listener: ListenerOptions {
                window_size: config.listener.window_size,
                max_backoff_multiplier: config.listener.max_backoff_multiplier,
                broker,
            },
            notifications: broker,
            sensor_timeout: config.listener.sensor_timeout(),
            store_timeout: config.store.timeout(),
        }
    }
}

/// Persistence backends used by the hub
#[derive(Clone)]
pub struct HubStores {
    pub sensors: Arc<dyn SensorStore>,
    pub measurements: Arc<dyn MeasurementStore>,
    pub sequences: Arc<dyn SequenceStore>,
    pub rules: Arc<dyn RuleStore>,
}

struct ListenerEntry {
    listener: Arc<Listener>,
    /// Polling task; push-only sensors have none
    task: Option<JoinHandle<()>>,
}

type ListenerRegistry = Arc<DashMap<SensorId, ListenerEntry>>;

/// Live event plane of the hub
pub struct Hub {
    listeners: ListenerRegistry,
    runners: DashMap<RuleId, RunnerHandle>,
    stores: HubStores,
    evaluator: Arc<ConditionEvaluator>,
    source: Arc<dyn ValueSource>,
    notifications: Arc<Broker<Notification>>,
    actions: mpsc::UnboundedSender<FiredAction>,
    dispatcher_stop: StopHandle,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    options: HubOptions,
}

impl Hub {
    /// Create a hub talking HTTP to its devices
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_http(stores: HubStores, options: HubOptions) -> HubResult<Self> {
        let source = Arc::new(HttpValueSource::new(options.sensor_timeout)?);
        let device = Arc::new(HttpDeviceClient::new(options.sensor_timeout)?);
        Ok(Self::new(stores, source, device, options))
    }

    /// Create a hub with custom device transports
    ///
    /// Starts the notification broker and the dispatcher, so this must be
    /// called from within a tokio runtime.
    pub fn new(
        stores: HubStores,
        source: Arc<dyn ValueSource>,
        device: Arc<dyn DeviceClient>,
        options: HubOptions,
    ) -> Self {
        let evaluator = Arc::new(
            ConditionEvaluator::new(stores.measurements.clone())
                .with_store_timeout(options.store_timeout),
        );

        let notifications = Arc::new(Broker::new(options.notifications));
        notifications.start();

        let executor: Arc<dyn SequenceExecutor> = Arc::new(HttpSequenceExecutor::new(
            stores.sensors.clone(),
            device.clone(),
            options.store_timeout,
        ));
        let dispatcher = Dispatcher::new(
            stores.sensors.clone(),
            stores.sequences.clone(),
            device,
            executor,
            notifications.clone(),
        )
        .with_store_timeout(options.store_timeout);

        let (actions, queue) = mpsc::unbounded_channel();
        let (dispatcher_stop, stop_signal) = stop_channel();
        let dispatcher_task = tokio::spawn(dispatcher.run(queue, stop_signal));

        Self {
            listeners: Arc::new(DashMap::new()),
            runners: DashMap::new(),
            stores,
            evaluator,
            source,
            notifications,
            actions,
            dispatcher_stop,
            dispatcher_task: Mutex::new(Some(dispatcher_task)),
            options,
        }
    }

    /// Start listeners for every stored sensor, then runners for every stored rule
    ///
    /// A rule that cannot start is logged and skipped.
    pub async fn bootstrap(&self) -> HubResult<()> {
        let sensors = bounded(self.options.store_timeout, self.stores.sensors.get_all()).await?;
        let sensor_count = sensors.len();
        for sensor in sensors {
            self.create_listener(sensor);
        }

        let rules = bounded(self.options.store_timeout, self.stores.rules.get_all()).await?;
        let mut started = 0;
        for rule in rules {
            let rule_id = rule.id;
            match self.start_rule(rule).await {
                Ok(()) => started += 1,
                Err(e) => error!(%rule_id, error = %e, "Rule not started"),
            }
        }

        info!(sensors = sensor_count, rules = started, "Hub bootstrapped");
        Ok(())
    }

    /// Register a listener and start it
    ///
    /// Active sensors only get their broker started; their values arrive
    /// through [`Hub::push_value`]. An existing listener for the same sensor
    /// is stopped and replaced. A polling listener that exits on a fatal
    /// error removes itself from the registry.
    pub fn create_listener(&self, sensor: Sensor) {
        let sensor_id = sensor.id;
        if self.stop_listener(sensor_id) {
            warn!(%sensor_id, "Replacing existing listener");
        }

        let listener = Arc::new(
            Listener::new(sensor, self.source.clone(), self.options.listener)
                .with_on_new_value(self.record_measurement()),
        );

        self.listeners.insert(
            sensor_id,
            ListenerEntry {
                listener: listener.clone(),
                task: None,
            },
        );

        if listener.sensor().active {
            listener.start_broker();
            debug!(%sensor_id, "Push-only listener registered");
            return;
        }

        let registry = self.listeners.clone();
        let polling = listener.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = polling.run().await {
                warn!(%sensor_id, error = %e, "Listener failed, unregistering");
            }
            // A replacement registered meanwhile stays in place
            registry.remove_if(&sensor_id, |_, entry| Arc::ptr_eq(&entry.listener, &polling));
        });

        if let Some(mut entry) = self.listeners.get_mut(&sensor_id) {
            if Arc::ptr_eq(&entry.listener, &listener) {
                entry.task = Some(task);
            }
        }
        debug!(%sensor_id, "Listener registered");
    }

    fn record_measurement(&self) -> OnNewValue {
        let measurements = self.stores.measurements.clone();
        let store_timeout = self.options.store_timeout;
        Arc::new(move |sensor_id, value| {
            let measurements = measurements.clone();
            tokio::spawn(async move {
                let insert = measurements.insert(sensor_id, Utc::now(), value);
                if let Err(e) = bounded(store_timeout, insert).await {
                    error!(%sensor_id, error = %e, "Writing measurement failed");
                }
            });
        })
    }

    /// Stop and forget a listener; returns whether one was registered
    ///
    /// Runners depending on it keep running on the last value they saw.
    pub fn stop_listener(&self, sensor_id: SensorId) -> bool {
        match self.listeners.remove(&sensor_id) {
            Some((_, entry)) => {
                entry.listener.stop();
                if entry.task.is_none() {
                    debug!(%sensor_id, "Push-only listener stopped");
                }
                true
            }
            None => false,
        }
    }

    /// Replace a sensor's listener and restart the rules that depend on it
    pub async fn reconfigure_listener(&self, sensor: Sensor) {
        let sensor_id = sensor.id;
        self.stop_listener(sensor_id);
        self.create_listener(sensor);

        let dependents: Vec<Rule> = self
            .runners
            .iter()
            .filter(|r| r.rule().internal.dependencies().contains(&sensor_id))
            .map(|r| r.rule().clone())
            .collect();

        for rule in dependents {
            let rule_id = rule.id;
            if let Err(e) = self.start_rule(rule).await {
                error!(%rule_id, error = %e, "Rule not restarted after listener change");
            }
        }
    }

    /// Feed a value into a sensor's listener
    pub async fn push_value(&self, sensor_id: SensorId, value: f64) -> HubResult<()> {
        let listener = self
            .listener(sensor_id)
            .ok_or(HubError::UnknownSensor(sensor_id))?;
        listener.push(value).await?;
        Ok(())
    }

    pub fn listener(&self, sensor_id: SensorId) -> Option<Arc<Listener>> {
        self.listeners
            .get(&sensor_id)
            .map(|entry| entry.listener.clone())
    }

    /// Start a runner for a rule, restarting it if it is already running
    pub async fn start_rule(&self, rule: Rule) -> HubResult<()> {
        let rule_id = rule.id;
        if self.stop_rule(rule_id).await {
            debug!(%rule_id, "Restarting rule");
        }

        let handle = RuleRunner::start(
            rule,
            |sensor_id| self.listener(sensor_id),
            self.evaluator.clone(),
            self.actions.clone(),
        )
        .await?;

        self.runners.insert(rule_id, handle);
        Ok(())
    }

    /// Stop a rule's runner and wait for it to release its outlets
    pub async fn stop_rule(&self, rule_id: RuleId) -> bool {
        match self.runners.remove(&rule_id) {
            Some((_, handle)) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    pub fn is_rule_running(&self, rule_id: RuleId) -> bool {
        self.runners
            .get(&rule_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Validate, store and start a new rule
    pub async fn create_rule(&self, rule: Rule) -> HubResult<Rule> {
        rule.validate()?;
        bounded(self.options.store_timeout, self.stores.rules.insert(&rule)).await?;
        info!(rule_id = %rule.id, name = %rule.name, "Rule created");

        self.start_rule(rule.clone()).await?;
        Ok(rule)
    }

    /// Validate and store a new version of a rule, then restart its runner
    ///
    /// The runner always restarts from a false outcome, whatever changed.
    pub async fn update_rule(&self, rule: Rule) -> HubResult<Rule> {
        rule.validate()?;
        let updated = bounded(self.options.store_timeout, self.stores.rules.update(&rule)).await?;
        info!(rule_id = %updated.id, version = updated.version, "Rule updated");

        self.start_rule(updated.clone()).await?;
        Ok(updated)
    }

    /// Stop a rule and remove it from the store
    pub async fn delete_rule(&self, rule_id: RuleId) -> HubResult<()> {
        self.stop_rule(rule_id).await;
        bounded(self.options.store_timeout, self.stores.rules.delete(rule_id)).await?;
        info!(%rule_id, "Rule deleted");
        Ok(())
    }

    /// Open a live session on this hub's sensors and notifications
    pub async fn open_session(&self) -> HubResult<(LiveSession, SessionHandle)> {
        let listeners = self.listeners.clone();
        let lookup: ListenerLookup = Arc::new(move |sensor_id| {
            listeners
                .get(&sensor_id)
                .map(|entry| entry.listener.clone())
        });
        Ok(LiveSession::open(lookup, self.notifications.clone()).await?)
    }

    /// Broker carrying hub notifications
    pub fn notifications(&self) -> &Arc<Broker<Notification>> {
        &self.notifications
    }

    /// Stop every runner, listener and the dispatcher
    pub async fn shutdown(&self) {
        info!("Shutting down hub");

        let rule_ids: Vec<RuleId> = self.runners.iter().map(|r| *r.key()).collect();
        for rule_id in rule_ids {
            self.stop_rule(rule_id).await;
        }

        let sensor_ids: Vec<SensorId> = self.listeners.iter().map(|l| *l.key()).collect();
        for sensor_id in sensor_ids {
            self.stop_listener(sensor_id);
        }

        self.notifications.stop();
        self.dispatcher_stop.stop();

        let task = match self.dispatcher_task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Dispatcher task failed");
            }
        }
        info!("Hub stopped");
    }
}
