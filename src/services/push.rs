//! Push notification client.
//!
//! Delivery is best-effort: the caller logs failures and never retries
//! synchronously.

use serde_json::json;
use thiserror::Error;

use super::REQUEST_TIMEOUT;

/// Push client errors
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Push service returned status {0}")]
    Status(u16),
}

/// Client for the external push delivery service.
pub struct PushClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PushClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Deliver one notification to one device.
    pub async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<(), PushError> {
        let payload = json!({
            "deviceToken": device_token,
            "title": title,
            "body": body,
            "data": data,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PushError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
