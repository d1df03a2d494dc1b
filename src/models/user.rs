//! User profile model.
//!
//! Identity itself is external; the stable user id string arrives on every
//! request. This record only carries what the core needs: the aggregate like
//! counter and the push device token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as seen by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    /// Lifetime likes received across all of the user's posts.
    pub total_likes: i64,
    pub updated_at: DateTime<Utc>,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating/updating the caller's profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub device_token: Option<String>,
}
