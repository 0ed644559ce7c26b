//! Writing values to devices

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::dispatcher::{DispatchError, DispatchResult};

/// Sends a JSON payload to a device
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// `PUT http://{uri}/value` with `payload` as the JSON body
    async fn put_value(&self, uri: &str, payload: &serde_json::Value) -> DispatchResult<()>;
}

/// [`DeviceClient`] over reqwest
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    client: Client,
}

impl HttpDeviceClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn put_value(&self, uri: &str, payload: &serde_json::Value) -> DispatchResult<()> {
        let url = format!("http://{}/value", uri.trim_end_matches('/'));

        let response = self
            .client
            .put(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}
