//! Persistence interfaces
//!
//! The hub never owns durable storage. It talks to whatever backs these
//! traits, and bounds every call with [`bounded`] so a slow backend cannot
//! wedge a runner or the dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::{Sensor, SensorId, Sequence, SequenceId};

/// Default deadline for a persistence call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("edit conflict on {kind} {id}")]
    EditConflict { kind: &'static str, id: String },

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Run a store call with a deadline, mapping expiry to [`StoreError::Timeout`]
pub async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Sensor registry lookups
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Resolve the network address of a device
    async fn get_uri(&self, id: SensorId) -> StoreResult<String>;

    /// All registered sensors
    async fn get_all(&self) -> StoreResult<Vec<Sensor>>;
}

/// Time series of observed values
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn insert(&self, sensor_id: SensorId, time: DateTime<Utc>, value: f64)
        -> StoreResult<()>;

    /// The `perc`-th percentile of values recorded in the trailing `window`
    async fn get_percentile(
        &self,
        sensor_id: SensorId,
        window: Duration,
        perc: u8,
    ) -> StoreResult<f64>;
}

/// Sequence lookups
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn get(&self, id: SequenceId) -> StoreResult<Sequence>;
}
