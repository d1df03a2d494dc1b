//! Image-safety classifier client.
//!
//! The classifier scores an image on three axes with a five-step likelihood
//! scale; `LIKELY` or worse on any axis makes the image unsafe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::REQUEST_TIMEOUT;

/// Classifier client errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Classifier returned status {0}")]
    Status(u16),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Likelihood scale as reported by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    #[default]
    Unknown,
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
}

/// Per-axis verdict for one image.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeSearchVerdict {
    #[serde(default)]
    pub adult: Likelihood,
    #[serde(default)]
    pub violence: Likelihood,
    #[serde(default)]
    pub racy: Likelihood,
}

impl SafeSearchVerdict {
    /// `LIKELY` or `VERY_LIKELY` on any axis fails the image.
    pub fn is_unsafe(&self) -> bool {
        [self.adult, self.violence, self.racy]
            .iter()
            .any(|level| *level >= Likelihood::Likely)
    }
}

/// Client for the external image-safety classifier.
pub struct SafetyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SafetyClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Classify the image behind `image_url`.
    pub async fn classify(&self, image_url: &str) -> Result<SafeSearchVerdict, VisionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "imageUrl": image_url }))
            .send()
            .await
            .map_err(|e| VisionError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VisionError::Status(response.status().as_u16()));
        }

        response
            .json::<SafeSearchVerdict>()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))
    }
}
