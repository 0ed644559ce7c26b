//! Where a listener gets its values from

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default deadline for one device request
pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single fetch failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The device could not be reached; the listener backs off and retries
    #[error("connection failed: {0}")]
    Connection(String),

    /// The device answered with a non-success status
    #[error("unexpected status {0}")]
    Status(u16),

    /// The body was not `{"value": <number>}`
    #[error("undecodable body: {0}")]
    Decode(String),
}

/// Reads the current value of a device
#[async_trait]
pub trait ValueSource: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<f64, FetchError>;
}

#[derive(Debug, Deserialize)]
struct ValueBody {
    value: f64,
}

/// Polls `GET http://{uri}/value`
#[derive(Debug, Clone)]
pub struct HttpValueSource {
    client: Client,
}

impl HttpValueSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Share an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ValueSource for HttpValueSource {
    async fn fetch(&self, uri: &str) -> Result<f64, FetchError> {
        let url = format!("http://{}/value", uri.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: ValueBody = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(body.value)
    }
}
