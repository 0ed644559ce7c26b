//! Sensor registry

use async_trait::async_trait;
use dashmap::DashMap;
use hub_core::{Sensor, SensorId, SensorStore, StoreError, StoreResult};
use tracing::debug;

/// Sensor registry held in memory
#[derive(Debug, Default)]
pub struct MemorySensorStore {
    sensors: DashMap<SensorId, Sensor>,
}

impl MemorySensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a list of sensors
    pub fn with_sensors(sensors: impl IntoIterator<Item = Sensor>) -> Self {
        let store = Self::new();
        for sensor in sensors {
            store.add(sensor);
        }
        store
    }

    /// Add or replace a sensor
    pub fn add(&self, sensor: Sensor) {
        debug!(sensor_id = %sensor.id, uri = %sensor.uri, "Storing sensor");
        self.sensors.insert(sensor.id, sensor);
    }

    pub fn remove(&self, id: SensorId) -> Option<Sensor> {
        self.sensors.remove(&id).map(|(_, sensor)| sensor)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

#[async_trait]
impl SensorStore for MemorySensorStore {
    async fn get_uri(&self, id: SensorId) -> StoreResult<String> {
        self.sensors
            .get(&id)
            .map(|sensor| sensor.uri.clone())
            .ok_or_else(|| StoreError::not_found("sensor", id))
    }

    async fn get_all(&self) -> StoreResult<Vec<Sensor>> {
        Ok(self.sensors.iter().map(|r| r.value().clone()).collect())
    }
}
