//! Shared fixtures for engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use hub_core::{Sensor, Sequence};
use hub_engine::{DeviceClient, DispatchResult, Hub, HubOptions, HubStores};
use hub_listener::{FetchError, ValueSource};
use hub_rules::Rule;
use hub_store::{MemoryMeasurementStore, MemoryRuleStore, MemorySensorStore, MemorySequenceStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded device write
#[derive(Debug, Clone)]
pub struct DeviceWrite {
    pub uri: String,
    pub payload: serde_json::Value,
    pub at: Instant,
}

/// Remembers every write instead of sending it
#[derive(Default)]
pub struct RecordingDevice {
    writes: Mutex<Vec<DeviceWrite>>,
}

impl RecordingDevice {
    pub fn writes(&self) -> Vec<DeviceWrite> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClient for RecordingDevice {
    async fn put_value(&self, uri: &str, payload: &serde_json::Value) -> DispatchResult<()> {
        self.writes.lock().unwrap().push(DeviceWrite {
            uri: uri.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// A device that is never reachable
pub struct UnreachableSource;

#[async_trait]
impl ValueSource for UnreachableSource {
    async fn fetch(&self, _uri: &str) -> Result<f64, FetchError> {
        Err(FetchError::Connection("connection refused".into()))
    }
}

/// A device that answers every poll with the same error status
pub struct FailingSource(pub u16);

#[async_trait]
impl ValueSource for FailingSource {
    async fn fetch(&self, _uri: &str) -> Result<f64, FetchError> {
        Err(FetchError::Status(self.0))
    }
}

/// A push-only sensor
pub fn active_sensor(uri: &str) -> Sensor {
    Sensor::new(uri, 1).active()
}

pub struct Fixture {
    pub hub: Hub,
    pub device: Arc<RecordingDevice>,
    pub sensors: Arc<MemorySensorStore>,
    pub measurements: Arc<MemoryMeasurementStore>,
    pub sequences: Arc<MemorySequenceStore>,
    pub rules: Arc<MemoryRuleStore>,
}

/// Build a hub over in-memory stores seeded with the given records
pub fn hub_with(sensors: Vec<Sensor>, sequences: Vec<Sequence>, rules: Vec<Rule>) -> Fixture {
    hub_with_source(Arc::new(UnreachableSource), sensors, sequences, rules)
}

/// Like [`hub_with`], polling sensors through `source`
pub fn hub_with_source(
    source: Arc<dyn ValueSource>,
    sensors: Vec<Sensor>,
    sequences: Vec<Sequence>,
    rules: Vec<Rule>,
) -> Fixture {
    let device = Arc::new(RecordingDevice::default());
    let sensors = Arc::new(MemorySensorStore::with_sensors(sensors));
    let measurements = Arc::new(MemoryMeasurementStore::new());
    let sequences = Arc::new(MemorySequenceStore::with_sequences(sequences));
    let rules = Arc::new(MemoryRuleStore::with_rules(rules));

    let stores = HubStores {
        sensors: sensors.clone(),
        measurements: measurements.clone(),
        sequences: sequences.clone(),
        rules: rules.clone(),
    };
    let hub = Hub::new(
        stores,
        source,
        device.clone(),
        HubOptions::default(),
    );

    Fixture {
        hub,
        device,
        sensors,
        measurements,
        sequences,
        rules,
    }
}

/// Let every spawned task run until the runtime is idle
///
/// Tests run with paused time, so this returns as soon as nothing else can
/// make progress.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
