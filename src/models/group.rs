//! Group model: a challenge cohort with its rotating tag state.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Placeholder recorded in tag history (and as the current tag once the
/// queue runs dry) for weeks without a prompt.
pub const NO_TAG_SENTINEL: &str = "No tag";

/// How a group can be found and joined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    PrivateCodeRequired,
    PublicDiscoverable,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::PrivateCodeRequired => "private-code-required",
            Visibility::PublicDiscoverable => "public-discoverable",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "private-code-required" => Some(Visibility::PrivateCodeRequired),
            "public-discoverable" => Some(Visibility::PublicDiscoverable),
            _ => None,
        }
    }
}

/// A challenge group.
///
/// Tag state invariant: `next_tag_switch_at` is always in the future
/// relative to the last rotation that was applied; the rotation engine
/// advances it strictly before acknowledging a rotation, which makes the
/// `next_tag_switch_at <= now` check an idempotence gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub title: String,
    /// Unique join key handed out to prospective members.
    pub room_code: String,
    pub visibility: Visibility,
    pub admin_id: String,
    /// Empty string means no tag has been set yet.
    pub current_tag: String,
    /// Upcoming tags, FIFO.
    pub queued_tags: Vec<String>,
    /// Past tags, most recent first.
    pub past_tags: Vec<String>,
    pub next_tag_switch_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a new group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub title: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub current_tag: Option<String>,
    #[serde(default)]
    pub queued_tags: Option<Vec<String>>,
}

/// Request body for updating group settings (admin only).
///
/// Deliberately has no way to touch `current_tag`, `past_tags`, or
/// `next_tag_switch_at`: tag state transitions belong to the rotation
/// engine alone.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupSettingsRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub room_code: Option<String>,
    #[serde(default)]
    pub queued_tags: Option<Vec<String>>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for joining a group by room code.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupRequest {
    pub room_code: String,
}

/// Characters used for room codes; ambiguous glyphs (0/O, 1/I) excluded.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 6;

/// Generate a random room code. Uniqueness is enforced by the store; the
/// caller retries on collision.
pub fn generate_room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}
