//! Action dispatch
//!
//! Every runner pushes fired actions onto one shared unbounded queue. The
//! dispatcher drains it one action at a time and carries each out. Failures
//! are logged and the action is dropped; nothing is retried.

use hub_broker::Broker;
use hub_core::store::{bounded, DEFAULT_STORE_TIMEOUT};
use hub_core::{
    Notification, NotificationLevel, SensorId, SensorStore, SequenceId, SequenceStore,
    StopSignal, StoreError,
};
use hub_rules::ActionTarget;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::device::DeviceClient;
use crate::runner::FiredAction;
use crate::sequence::SequenceExecutor;

/// Why an action could not be carried out
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("device request failed: {0}")]
    Transport(String),

    #[error("device answered with status {0}")]
    Status(u16),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Carries out fired actions
pub struct Dispatcher {
    sensors: Arc<dyn SensorStore>,
    sequences: Arc<dyn SequenceStore>,
    device: Arc<dyn DeviceClient>,
    executor: Arc<dyn SequenceExecutor>,
    notifications: Arc<Broker<Notification>>,
    store_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        sensors: Arc<dyn SensorStore>,
        sequences: Arc<dyn SequenceStore>,
        device: Arc<dyn DeviceClient>,
        executor: Arc<dyn SequenceExecutor>,
        notifications: Arc<Broker<Notification>>,
    ) -> Self {
        Self {
            sensors,
            sequences,
            device,
            executor,
            notifications,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Drain the queue until it closes or `stop` fires
    pub async fn run(self, mut queue: mpsc::UnboundedReceiver<FiredAction>, mut stop: StopSignal) {
        info!("Starting action dispatcher");
        loop {
            let fired = tokio::select! {
                _ = stop.stopped() => break,
                fired = queue.recv() => match fired {
                    Some(fired) => fired,
                    None => break,
                },
            };

            if let Err(e) = self.dispatch(&fired).await {
                error!(
                    rule_id = %fired.rule_id,
                    target = %fired.action.target_id,
                    error = %e,
                    "Dropping action"
                );
            }
        }
        info!("Action dispatcher stopped");
    }

    /// Carry out a single action
    ///
    /// A sequence is only looked up here; it plays in its own task so a
    /// long sequence does not hold up the queue.
    #[instrument(skip(self, fired), fields(rule_id = %fired.rule_id))]
    pub async fn dispatch(&self, fired: &FiredAction) -> DispatchResult<()> {
        let action = &fired.action;
        match action.target_type {
            ActionTarget::Sensor => {
                let sensor_id = SensorId::from(action.target_id);
                let payload = serde_json::Value::Object(action.payload.clone());
                self.notify(format!("Sent message {payload} to sensor {sensor_id}"))
                    .await;

                let uri = bounded(self.store_timeout, self.sensors.get_uri(sensor_id)).await?;
                debug!(%sensor_id, %uri, "Writing payload to device");
                self.device.put_value(&uri, &payload).await
            }
            ActionTarget::Sequence => {
                let sequence_id = SequenceId::from(action.target_id);
                self.notify(format!("Starting sequence: {sequence_id}")).await;

                let sequence =
                    bounded(self.store_timeout, self.sequences.get(sequence_id)).await?;
                let executor = self.executor.clone();
                tokio::spawn(async move {
                    if let Err(e) = executor.execute(sequence).await {
                        error!(%sequence_id, error = %e, "Sequence aborted");
                    }
                });
                Ok(())
            }
        }
    }

    async fn notify(&self, description: String) {
        let notification = Notification::new(NotificationLevel::Success, "Rule passed!", description);
        if let Err(e) = self.notifications.publish(notification).await {
            warn!(error = %e, "Notification dropped");
        }
    }
}
