//! Shared fixtures for listener tests

use async_trait::async_trait;
use hub_listener::{FetchError, ValueSource};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

/// Replays a fixed script of fetch results, then reports the device offline
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<f64, FetchError>>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<f64, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// When each fetch happened
    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ValueSource for ScriptedSource {
    async fn fetch(&self, _uri: &str) -> Result<f64, FetchError> {
        self.calls.lock().unwrap().push(Instant::now());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Connection("script exhausted".into())))
    }
}

pub fn offline() -> Result<f64, FetchError> {
    Err(FetchError::Connection("connection refused".into()))
}
