//! Blob store client.
//!
//! Clients upload images out-of-band and hand the core an opaque URL; the
//! core only ever asks the store to delete an object once its post is gone.

use thiserror::Error;

use super::REQUEST_TIMEOUT;

/// Blob store client errors
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Blob store returned status {0}")]
    Status(u16),
}

/// Client for the external blob store.
pub struct BlobClient {
    http: reqwest::Client,
    endpoint: String,
}

impl BlobClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Delete the object behind `url`.
    pub async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let response = self
            .http
            .post(format!("{}/delete", self.endpoint))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| BlobError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BlobError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
