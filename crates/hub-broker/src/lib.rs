//! Fan-out broker for live values
//!
//! A [`Broker`] owns a single serving task. Subscribing, unsubscribing and
//! publishing are all commands on one ordered queue, so an outlet registered
//! after a publish never sees that value, and every outlet observes values in
//! publish order.
//!
//! Each outlet has a small buffer. A subscriber that leaves its buffer full
//! for longer than the hand-off timeout misses that value; the publisher is
//! never stalled indefinitely by one slow reader.

use futures::Stream;
use hub_core::{stop_channel, StopHandle, StopSignal};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default buffer size of each outlet
pub const DEFAULT_OUTLET_CAPACITY: usize = 16;

/// Default time a publish waits on a full outlet
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_millis(500);

/// Default depth of the command queue
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Errors returned by broker operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is stopped")]
    Stopped,
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Tuning knobs for a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerOptions {
    /// Buffered values per outlet
    pub outlet_capacity: usize,
    /// How long a publish waits for a full outlet before skipping it
    pub handoff_timeout: Duration,
    /// Depth of the command queue
    pub command_capacity: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            outlet_capacity: DEFAULT_OUTLET_CAPACITY,
            handoff_timeout: DEFAULT_HANDOFF_TIMEOUT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

/// A unique identifier for an outlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutletId(u64);

enum Command<T> {
    Subscribe(OutletId, mpsc::Sender<T>),
    Unsubscribe(OutletId),
    Publish(T),
}

/// Fan-out broker
///
/// Values of type `T` are cloned once per outlet.
pub struct Broker<T> {
    commands: mpsc::Sender<Command<T>>,
    /// Receiver half, taken by the serving task on start
    pending: Mutex<Option<mpsc::Receiver<Command<T>>>>,
    stop: StopHandle,
    running: AtomicBool,
    next_outlet_id: AtomicU64,
    options: BrokerOptions,
}

impl<T: Clone + Send + 'static> Broker<T> {
    /// Create a broker; nothing is delivered until [`Broker::start`]
    pub fn new(options: BrokerOptions) -> Self {
        let (commands, rx) = mpsc::channel(options.command_capacity.max(1));
        let (stop, _) = stop_channel();
        Self {
            commands,
            pending: Mutex::new(Some(rx)),
            stop,
            running: AtomicBool::new(false),
            next_outlet_id: AtomicU64::new(1),
            options,
        }
    }

    /// Spawn the serving task
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a
    /// logged no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Broker already running");
            return;
        }

        let rx = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(rx) = rx else {
            warn!("Broker command queue already consumed");
            return;
        };

        tokio::spawn(serve(rx, self.stop.signal(), self.options.handoff_timeout));
    }

    /// Stop the serving task and close every outlet
    pub fn stop(&self) {
        if !self.stop.is_stopped() {
            debug!("Stopping broker");
        }
        self.stop.stop();
    }

    /// Whether [`Broker::stop`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Register a new outlet
    ///
    /// The outlet receives every value published after this call returns.
    pub async fn subscribe(&self) -> BrokerResult<Outlet<T>> {
        let id = OutletId(self.next_outlet_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(self.options.outlet_capacity.max(1));
        self.send(Command::Subscribe(id, tx)).await?;
        trace!(outlet = id.0, "Outlet subscribed");
        Ok(Outlet { id, rx })
    }

    /// Remove and close an outlet. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: OutletId) -> BrokerResult<()> {
        self.send(Command::Unsubscribe(id)).await
    }

    /// Hand a value to every outlet currently registered
    pub async fn publish(&self, value: T) -> BrokerResult<()> {
        self.send(Command::Publish(value)).await
    }

    async fn send(&self, command: Command<T>) -> BrokerResult<()> {
        if self.stop.is_stopped() {
            return Err(BrokerError::Stopped);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| BrokerError::Stopped)
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new(BrokerOptions::default())
    }
}

impl<T> Drop for Broker<T> {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn serve<T: Clone + Send + 'static>(
    mut commands: mpsc::Receiver<Command<T>>,
    mut stop: StopSignal,
    handoff_timeout: Duration,
) {
    // Kept in subscription order
    let mut outlets: Vec<(OutletId, mpsc::Sender<T>)> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Subscribe(id, tx) => {
                        outlets.push((id, tx));
                    }
                    Command::Unsubscribe(id) => {
                        let before = outlets.len();
                        outlets.retain(|(existing, _)| *existing != id);
                        if outlets.len() == before {
                            trace!(outlet = id.0, "Unsubscribe for unknown outlet");
                        }
                    }
                    Command::Publish(value) => {
                        deliver(&mut outlets, value, handoff_timeout).await;
                    }
                }
            }
        }
    }

    // Dropping the senders closes every outlet
    debug!(outlets = outlets.len(), "Broker stopped");
}

async fn deliver<T: Clone>(
    outlets: &mut Vec<(OutletId, mpsc::Sender<T>)>,
    value: T,
    handoff_timeout: Duration,
) {
    let mut closed = Vec::new();

    for (id, tx) in outlets.iter() {
        match tokio::time::timeout(handoff_timeout, tx.send(value.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => closed.push(*id),
            Err(_) => {
                warn!(outlet = id.0, ?handoff_timeout, "Outlet full, value skipped");
            }
        }
    }

    if !closed.is_empty() {
        trace!(count = closed.len(), "Pruning closed outlets");
        outlets.retain(|(id, _)| !closed.contains(id));
    }
}

/// Receive side of a broker subscription
///
/// Yields values in publish order and ends once the broker stops or the
/// outlet is unsubscribed.
#[derive(Debug)]
pub struct Outlet<T> {
    id: OutletId,
    rx: mpsc::Receiver<T>,
}

impl<T> Outlet<T> {
    pub fn id(&self) -> OutletId {
        self.id
    }

    /// Receive the next value, `None` once the outlet is closed
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Stream for Outlet<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
