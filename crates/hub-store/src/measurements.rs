//! Measurement history
//!
//! Each sensor's series is kept sorted by time. Inserting prunes whatever has
//! fallen out of the retention window measured back from the newest value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hub_core::{MeasurementStore, SensorId, StoreError, StoreResult};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{instrument, trace};

/// Retention used by [`MemoryMeasurementStore::new`]
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Measurement history held in memory
///
/// Percentiles use the nearest-rank method over the values recorded inside
/// the requested trailing window.
#[derive(Debug)]
pub struct MemoryMeasurementStore {
    series: DashMap<SensorId, VecDeque<(DateTime<Utc>, f64)>>,
    retention: chrono::Duration,
}

impl Default for MemoryMeasurementStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep values for `retention` behind each sensor's newest one
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            series: DashMap::new(),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Number of values recorded for a sensor
    pub fn count(&self, sensor_id: SensorId) -> usize {
        self.series.get(&sensor_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Percentile relative to an explicit point in time
    pub fn percentile_at(
        &self,
        sensor_id: SensorId,
        now: DateTime<Utc>,
        window: Duration,
        perc: u8,
    ) -> StoreResult<f64> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Backend(format!("window out of range: {e}")))?;
        let since = now - window;

        let mut values: Vec<f64> = self
            .series
            .get(&sensor_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|(time, _)| *time >= since && *time <= now)
                    .map(|(_, value)| *value)
                    .collect()
            })
            .unwrap_or_default();

        if values.is_empty() {
            return Err(StoreError::not_found("measurements", sensor_id));
        }

        values.sort_by(f64::total_cmp);
        let rank = (usize::from(perc.clamp(1, 100)) * values.len()).div_ceil(100);
        Ok(values[rank.saturating_sub(1)])
    }
}

#[async_trait]
impl MeasurementStore for MemoryMeasurementStore {
    async fn insert(
        &self,
        sensor_id: SensorId,
        time: DateTime<Utc>,
        value: f64,
    ) -> StoreResult<()> {
        trace!(%sensor_id, %time, value, "Recording measurement");
        let mut series = self.series.entry(sensor_id).or_default();

        // Polled values arrive in order, so this is almost always a push_back
        let at = series.partition_point(|(t, _)| *t <= time);
        series.insert(at, (time, value));

        let cutoff = series
            .back()
            .and_then(|&(newest, _)| newest.checked_sub_signed(self.retention));
        if let Some(cutoff) = cutoff {
            while series.front().is_some_and(|&(oldest, _)| oldest < cutoff) {
                series.pop_front();
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_percentile(
        &self,
        sensor_id: SensorId,
        window: Duration,
        perc: u8,
    ) -> StoreResult<f64> {
        self.percentile_at(sensor_id, Utc::now(), window, perc)
    }
}
