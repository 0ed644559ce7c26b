//! Live sessions
//!
//! A session streams readings of the sensors it is subscribed to, together
//! with every hub notification, to one consumer. Subscriptions change at
//! runtime through a [`SessionHandle`]. Once closed a session cannot be
//! reopened; ask the hub for a new one.

use futures::{Stream, StreamExt};
use hub_broker::{Broker, BrokerResult, OutletId};
use hub_core::{Notification, SensorId};
use hub_listener::Listener;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::multiplexer::{MuxEvent, Multiplexer};

/// Finds the listener of a sensor, if one is registered
pub type ListenerLookup = Arc<dyn Fn(SensorId) -> Option<Arc<Listener>> + Send + Sync>;

/// Where a session event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSource {
    Sensor(SensorId),
    Notifications,
}

/// One item delivered to a session consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Newest value of a sensor, or `None` while it is offline
    Reading {
        sensor_id: SensorId,
        value: Option<f64>,
    },
    Notification(Notification),
}

#[derive(Debug)]
enum SessionCommand {
    Subscribe(SensorId),
    Unsubscribe(SensorId),
    Close,
}

/// Controls which sensors a session follows
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn subscribe(&self, sensor_id: SensorId) {
        self.send(SessionCommand::Subscribe(sensor_id));
    }

    pub fn unsubscribe(&self, sensor_id: SensorId) {
        self.send(SessionCommand::Unsubscribe(sensor_id));
    }

    /// End the session; the stream yields nothing afterwards
    pub fn close(&self) {
        self.send(SessionCommand::Close);
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            trace!("Session already closed");
        }
    }
}

/// Consumer side of a session
pub struct LiveSession {
    mux: Multiplexer<SessionSource, SessionEvent, SessionCommand>,
    lookup: ListenerLookup,
    sensors: HashMap<SensorId, (Arc<Listener>, OutletId)>,
    notifications: Arc<Broker<Notification>>,
    notification_outlet: OutletId,
    closed: bool,
}

impl LiveSession {
    /// Open a session following notifications and no sensors yet
    pub async fn open(
        lookup: ListenerLookup,
        notifications: Arc<Broker<Notification>>,
    ) -> BrokerResult<(Self, SessionHandle)> {
        let outlet = notifications.subscribe().await?;
        let notification_outlet = outlet.id();

        let (commands, control) = mpsc::unbounded_channel();
        let mut mux = Multiplexer::new(control);
        mux.insert(
            SessionSource::Notifications,
            outlet.map(SessionEvent::Notification),
        );

        debug!("Session opened");
        let session = Self {
            mux,
            lookup,
            sensors: HashMap::new(),
            notifications,
            notification_outlet,
            closed: false,
        };
        Ok((session, SessionHandle { commands }))
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the session has been closed, either through a
    /// handle, by dropping every handle, or because the hub shut down.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        while !self.closed {
            match self.mux.next().await {
                MuxEvent::Source(_, event) => return Some(event),
                MuxEvent::Control(SessionCommand::Subscribe(sensor_id)) => {
                    self.subscribe(sensor_id).await;
                }
                MuxEvent::Control(SessionCommand::Unsubscribe(sensor_id)) => {
                    self.unsubscribe(sensor_id).await;
                }
                MuxEvent::Control(SessionCommand::Close) | MuxEvent::ControlClosed => {
                    self.close().await;
                }
                MuxEvent::SourceClosed(SessionSource::Sensor(sensor_id)) => {
                    debug!(%sensor_id, "Sensor stream ended");
                    self.sensors.remove(&sensor_id);
                }
                MuxEvent::SourceClosed(SessionSource::Notifications) => {
                    info!("Notification stream ended, closing session");
                    self.close().await;
                }
            }
        }
        None
    }

    /// Adapt the session into a stream of events
    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> + Send {
        futures::stream::unfold(self, |mut session| async move {
            let event = session.next().await?;
            Some((event, session))
        })
    }

    /// Sensors currently followed
    pub fn subscriptions(&self) -> Vec<SensorId> {
        self.sensors.keys().copied().collect()
    }

    async fn subscribe(&mut self, sensor_id: SensorId) {
        if self.sensors.contains_key(&sensor_id) {
            debug!(%sensor_id, "Already subscribed");
            return;
        }

        let Some(listener) = (self.lookup)(sensor_id) else {
            warn!(%sensor_id, "No listener for sensor, ignoring subscription");
            return;
        };

        let outlet = match listener.subscribe().await {
            Ok(outlet) => outlet,
            Err(e) => {
                warn!(%sensor_id, error = %e, "Could not subscribe to sensor");
                return;
            }
        };

        self.sensors.insert(sensor_id, (listener, outlet.id()));
        self.mux.insert(
            SessionSource::Sensor(sensor_id),
            outlet.map(move |reading| SessionEvent::Reading {
                sensor_id,
                value: reading.latest(),
            }),
        );
        debug!(%sensor_id, "Session subscribed");
    }

    async fn unsubscribe(&mut self, sensor_id: SensorId) {
        let Some((listener, outlet)) = self.sensors.remove(&sensor_id) else {
            debug!(%sensor_id, "Not subscribed");
            return;
        };

        self.mux.remove(&SessionSource::Sensor(sensor_id));
        if let Err(e) = listener.unsubscribe(outlet).await {
            trace!(%sensor_id, error = %e, "Unsubscribe skipped");
        }
        debug!(%sensor_id, "Session unsubscribed");
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for (sensor_id, (listener, outlet)) in self.sensors.drain() {
            self.mux.remove(&SessionSource::Sensor(sensor_id));
            if let Err(e) = listener.unsubscribe(outlet).await {
                trace!(%sensor_id, error = %e, "Unsubscribe skipped");
            }
        }

        self.mux.remove(&SessionSource::Notifications);
        if let Err(e) = self.notifications.unsubscribe(self.notification_outlet).await {
            trace!(error = %e, "Notification unsubscribe skipped");
        }
        debug!("Session closed");
    }
}
