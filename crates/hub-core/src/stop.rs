//! Cooperative stop signal
//!
//! Every long-running task in the hub (brokers, listeners, runners, sessions)
//! watches a [`StopSignal`] and exits at its next suspension point once the
//! matching [`StopHandle`] fires. Nothing is ever aborted from outside.

use tokio::sync::watch;

/// Create a linked stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Owner side of a stop signal
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Request the task to stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether stop has already been requested
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Get another signal observing this handle
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Task side of a stop signal
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once stop has been requested
    ///
    /// Dropping the [`StopHandle`] counts as a stop request.
    pub async fn stopped(&mut self) {
        // wait_for only errors when the sender is gone
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
