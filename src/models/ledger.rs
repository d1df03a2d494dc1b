//! Membership ledger record: per-(user, group) streak and points state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted streak/points state for one user in one group.
///
/// Created with zero defaults when the user joins the group; mutated only by
/// the streak engine (posts, missed-week sweep) and the like engine (point
/// deltas). All mutations go through version-checked read-modify-writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub user_id: String,
    pub group_id: String,
    /// Consecutive tag-weeks with a qualifying post.
    pub streak: i64,
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_post_at: Option<DateTime<Utc>>,
    /// Week-start of the most recent tag-week this user posted in, absent if
    /// the user has never posted in this group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tag_week: Option<DateTime<Utc>>,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

impl LedgerRecord {
    /// A fresh record for a user who just joined.
    pub fn new(user_id: &str, group_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            streak: 0,
            points: 0,
            last_post_at: None,
            last_tag_week: None,
            version: 1,
        }
    }
}

/// One row of a group's leaderboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    pub streak: i64,
    pub points: i64,
}
