//! Post model and the receipts returned by the posting/like engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation verdict on a post's image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ModerationStatus::Pending),
            "approved" => Some(ModerationStatus::Approved),
            "rejected" => Some(ModerationStatus::Rejected),
            _ => None,
        }
    }
}

/// A photo posted into a group.
///
/// `tag` is frozen at creation time: it records which prompt (and therefore
/// which week) the post counted toward, regardless of later rotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub group_id: String,
    pub author_id: String,
    pub tag: String,
    /// Opaque URL into the external blob store.
    pub image_url: String,
    pub published_at: DateTime<Utc>,
    /// User ids that currently like this post.
    pub liked_by: Vec<String>,
    pub moderation_status: ModerationStatus,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub image_url: String,
    /// Optional idempotency key: a client retrying a timed-out create with
    /// the same key gets the original post back instead of a duplicate.
    #[serde(default)]
    pub client_key: Option<String>,
}

/// What the posting engine reports back: the stored post plus the resulting
/// ledger state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReceipt {
    pub post: Post,
    pub streak: i64,
    pub points: i64,
    pub points_delta: i64,
}

/// What the like engine reports back after a toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeReceipt {
    pub post_id: String,
    /// Whether the caller likes the post after the toggle.
    pub liked: bool,
    pub like_count: i64,
    pub author_total_likes: i64,
    pub author_points: i64,
}
