//! Polling loop for a single sensor

use hub_broker::{Broker, BrokerError, BrokerOptions, BrokerResult, Outlet, OutletId};
use hub_core::{stop_channel, Reading, Sensor, SensorId, StopHandle, DEFAULT_WINDOW_SIZE};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::source::{FetchError, ValueSource};

/// Default cap on the backoff multiplier after repeated connection failures
pub const DEFAULT_MAX_BACKOFF_MULTIPLIER: u32 = 32;

/// Errors that end a listener
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("sensor {sensor_id} answered with status {status}")]
    HttpStatus { sensor_id: SensorId, status: u16 },

    #[error("sensor {sensor_id} sent an undecodable value: {message}")]
    Decode { sensor_id: SensorId, message: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Result type for listener operations
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Side effect run for every accepted value, typically persisting it
pub type OnNewValue = Arc<dyn Fn(SensorId, f64) + Send + Sync>;

/// Tuning knobs for a listener
#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    /// Values kept in the recency window
    pub window_size: usize,
    /// Upper bound for the backoff multiplier
    pub max_backoff_multiplier: u32,
    /// Options of the owned broker
    pub broker: BrokerOptions,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_backoff_multiplier: DEFAULT_MAX_BACKOFF_MULTIPLIER,
            broker: BrokerOptions::default(),
        }
    }
}

/// Polls one sensor and publishes its recency window
///
/// Every cycle sleeps `refresh_rate × multiplier`, then fetches a value:
/// - success resets the multiplier, appends the value to the window and
///   publishes [`Reading::Online`];
/// - an unreachable device publishes [`Reading::Offline`] and doubles the
///   multiplier up to the configured cap;
/// - a bad status or body ends the listener with an error.
///
/// Active sensors are never polled. Their owner starts only the broker with
/// [`Listener::start_broker`] and feeds values through [`Listener::push`].
pub struct Listener {
    sensor: Sensor,
    window: RwLock<VecDeque<f64>>,
    broker: Broker<Reading>,
    stop: StopHandle,
    source: Arc<dyn ValueSource>,
    on_new_value: Option<OnNewValue>,
    options: ListenerOptions,
}

impl Listener {
    pub fn new(sensor: Sensor, source: Arc<dyn ValueSource>, options: ListenerOptions) -> Self {
        let (stop, _) = stop_channel();
        Self {
            sensor,
            window: RwLock::new(VecDeque::with_capacity(options.window_size)),
            broker: Broker::new(options.broker),
            stop,
            source,
            on_new_value: None,
            options,
        }
    }

    /// Run a side effect for every accepted value
    pub fn with_on_new_value(mut self, on_new_value: OnNewValue) -> Self {
        self.on_new_value = Some(on_new_value);
        self
    }

    pub fn sensor(&self) -> &Sensor {
        &self.sensor
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor.id
    }

    /// Start the broker without polling, for sensors that push their values
    pub fn start_broker(&self) {
        self.broker.start();
    }

    /// Poll until stopped or a fatal error occurs
    ///
    /// The broker is started on entry and stopped on every exit path.
    pub async fn run(&self) -> ListenerResult<()> {
        info!(sensor_id = %self.sensor.id, uri = %self.sensor.uri, "Starting listener");
        self.broker.start();

        let result = self.poll_loop().await;

        self.broker.stop();
        match &result {
            Ok(()) => info!(sensor_id = %self.sensor.id, "Listener stopped"),
            Err(e) => warn!(sensor_id = %self.sensor.id, error = %e, "Listener failed"),
        }
        result
    }

    async fn poll_loop(&self) -> ListenerResult<()> {
        let mut stop = self.stop.signal();
        let max_multiplier = self.options.max_backoff_multiplier.max(1);
        let mut multiplier: u32 = 1;

        loop {
            if stop.is_stopped() {
                return Ok(());
            }

            let delay = self.sensor.refresh_interval() * multiplier;
            tokio::select! {
                _ = stop.stopped() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }

            let fetched = tokio::select! {
                _ = stop.stopped() => return Ok(()),
                fetched = self.source.fetch(&self.sensor.uri) => fetched,
            };

            match fetched {
                Ok(value) => {
                    multiplier = 1;
                    self.accept(value).await?;
                }
                Err(FetchError::Connection(reason)) => {
                    multiplier = multiplier.saturating_mul(2).min(max_multiplier);
                    debug!(
                        sensor_id = %self.sensor.id,
                        %reason,
                        multiplier,
                        "Sensor unreachable, backing off"
                    );
                    self.broker.publish(Reading::Offline).await?;
                }
                Err(FetchError::Status(status)) => {
                    return Err(ListenerError::HttpStatus {
                        sensor_id: self.sensor.id,
                        status,
                    });
                }
                Err(FetchError::Decode(message)) => {
                    return Err(ListenerError::Decode {
                        sensor_id: self.sensor.id,
                        message,
                    });
                }
            }
        }
    }

    /// Accept a value pushed by an active sensor
    pub async fn push(&self, value: f64) -> ListenerResult<()> {
        self.accept(value).await
    }

    async fn accept(&self, value: f64) -> ListenerResult<()> {
        let values = {
            let mut window = self.window.write().await;
            window.push_back(value);
            while window.len() > self.options.window_size.max(1) {
                window.pop_front();
            }
            window.iter().copied().collect::<Vec<_>>()
        };

        trace!(sensor_id = %self.sensor.id, value, "New value");
        if let Some(on_new_value) = &self.on_new_value {
            on_new_value(self.sensor.id, value);
        }

        self.broker.publish(Reading::Online { values }).await?;
        Ok(())
    }

    /// Snapshot of the recency window, oldest first
    pub async fn current_values(&self) -> Vec<f64> {
        self.window.read().await.iter().copied().collect()
    }

    /// Newest value seen, if any
    pub async fn latest(&self) -> Option<f64> {
        self.window.read().await.back().copied()
    }

    pub async fn subscribe(&self) -> BrokerResult<Outlet<Reading>> {
        self.broker.subscribe().await
    }

    pub async fn unsubscribe(&self, id: OutletId) -> BrokerResult<()> {
        self.broker.unsubscribe(id).await
    }

    /// Request the polling loop to end
    ///
    /// Also stops the broker so push-only listeners release their outlets.
    pub fn stop(&self) {
        self.stop.stop();
        self.broker.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("sensor", &self.sensor)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
