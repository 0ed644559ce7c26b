//! Timed sequences of device writes

use async_trait::async_trait;
use hub_core::store::bounded;
use hub_core::{SensorStore, Sequence};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::device::DeviceClient;
use crate::dispatcher::DispatchResult;

/// Plays a sequence to completion
#[async_trait]
pub trait SequenceExecutor: Send + Sync {
    async fn execute(&self, sequence: Sequence) -> DispatchResult<()>;
}

/// Resolves every target first, then writes each value after its delay
///
/// A target that cannot be resolved aborts the sequence before anything is
/// sent. A failed write is logged and the remaining steps still run.
pub struct HttpSequenceExecutor {
    sensors: Arc<dyn SensorStore>,
    device: Arc<dyn DeviceClient>,
    store_timeout: Duration,
}

impl HttpSequenceExecutor {
    pub fn new(
        sensors: Arc<dyn SensorStore>,
        device: Arc<dyn DeviceClient>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            sensors,
            device,
            store_timeout,
        }
    }
}

#[async_trait]
impl SequenceExecutor for HttpSequenceExecutor {
    async fn execute(&self, sequence: Sequence) -> DispatchResult<()> {
        let mut steps = Vec::with_capacity(sequence.actions.len());
        for action in &sequence.actions {
            let uri = bounded(self.store_timeout, self.sensors.get_uri(action.target)).await?;
            steps.push((uri, action));
        }

        info!(sequence_id = %sequence.id, steps = steps.len(), "Running sequence");
        for (uri, action) in steps {
            tokio::time::sleep(action.delay()).await;

            debug!(sequence_id = %sequence.id, target = %action.target, value = action.value, "Sequence step");
            if let Err(e) = self
                .device
                .put_value(&uri, &json!({ "value": action.value }))
                .await
            {
                warn!(sequence_id = %sequence.id, %uri, error = %e, "Sequence step failed");
            }
        }
        Ok(())
    }
}
