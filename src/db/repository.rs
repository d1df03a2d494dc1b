//! Database repository for all data operations.
//!
//! Uses prepared statements and transactions for data integrity. Mutations
//! to versioned rows are conditional on the version observed by the caller;
//! a lost race surfaces as [`AppError::Conflict`], which the engines retry
//! with fresh reads.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    Group, LeaderboardEntry, LedgerRecord, ModerationStatus, Post, UpdateGroupSettingsRequest,
    UpsertProfileRequest, UserProfile, Visibility,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== USER OPERATIONS ====================

    /// Create the user row with explicit defaults if it does not exist yet.
    pub async fn ensure_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            "INSERT OR IGNORE INTO users (id, display_name, device_token, total_likes, updated_at, version) VALUES (?, '', NULL, 0, ?, 1)"
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a user profile by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query(
            "SELECT id, display_name, device_token, total_likes, updated_at, version FROM users WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Create or update the caller's profile fields.
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        request: &UpsertProfileRequest,
    ) -> Result<UserProfile, AppError> {
        let now = Utc::now();
        self.ensure_user(user_id, now).await?;

        let existing = self
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let display_name = request
            .display_name
            .as_ref()
            .unwrap_or(&existing.display_name);
        let device_token = request
            .device_token
            .clone()
            .or(existing.device_token.clone());
        let new_version = existing.version + 1;

        let result = sqlx::query(
            "UPDATE users SET display_name = ?, device_token = ?, updated_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(display_name)
        .bind(&device_token)
        .bind(now)
        .bind(new_version)
        .bind(user_id)
        .bind(existing.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Concurrent modification of user {}",
                user_id
            )));
        }

        Ok(UserProfile {
            id: user_id.to_string(),
            display_name: display_name.clone(),
            device_token,
            total_likes: existing.total_likes,
            updated_at: now,
            version: new_version,
        })
    }

    // ==================== GROUP OPERATIONS ====================

    /// Create a group together with its admin's membership and ledger record.
    pub async fn create_group(&self, group: &Group, now: DateTime<Utc>) -> Result<(), AppError> {
        let queued_json = serde_json::to_string(&group.queued_tags)?;
        let past_json = serde_json::to_string(&group.past_tags)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO groups (
                id, title, room_code, visibility, admin_id, current_tag,
                queued_tags, past_tags, next_tag_switch_at, created_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&group.id)
        .bind(&group.title)
        .bind(&group.room_code)
        .bind(group.visibility.as_str())
        .bind(&group.admin_id)
        .bind(&group.current_tag)
        .bind(&queued_json)
        .bind(&past_json)
        .bind(group.next_tag_switch_at)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_to_conflict(e, "Room code"))?;

        sqlx::query(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(&group.id)
        .bind(&group.admin_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO ledger (user_id, group_id, streak, points, last_post_at, last_tag_week, version) VALUES (?, ?, 0, 0, NULL, NULL, 1)"
        )
        .bind(&group.admin_id)
        .bind(&group.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a group by ID.
    pub async fn get_group(&self, id: &str) -> Result<Option<Group>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, title, room_code, visibility, admin_id, current_tag,
                      queued_tags, past_tags, next_tag_switch_at, created_at, version
               FROM groups WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(group_from_row))
    }

    /// Find a group by its unique room code.
    pub async fn find_group_by_room_code(&self, code: &str) -> Result<Option<Group>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, title, room_code, visibility, admin_id, current_tag,
                      queued_tags, past_tags, next_tag_switch_at, created_at, version
               FROM groups WHERE room_code = ?"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(group_from_row))
    }

    /// List groups that are open for discovery.
    pub async fn list_public_groups(&self) -> Result<Vec<Group>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, title, room_code, visibility, admin_id, current_tag,
                      queued_tags, past_tags, next_tag_switch_at, created_at, version
               FROM groups WHERE visibility = ? ORDER BY title"#,
        )
        .bind(Visibility::PublicDiscoverable.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(group_from_row).collect())
    }

    /// Groups whose rotation deadline has passed.
    pub async fn due_groups(&self, now: DateTime<Utc>) -> Result<Vec<Group>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, title, room_code, visibility, admin_id, current_tag,
                      queued_tags, past_tags, next_tag_switch_at, created_at, version
               FROM groups WHERE next_tag_switch_at <= ?"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(group_from_row).collect())
    }

    /// Update group metadata with optimistic concurrency control.
    ///
    /// Tag rotation state (`current_tag`, `past_tags`, `next_tag_switch_at`)
    /// is deliberately untouchable here; only the rotation engine writes it.
    pub async fn update_group_settings(
        &self,
        id: &str,
        request: &UpdateGroupSettingsRequest,
    ) -> Result<Group, AppError> {
        let existing = self
            .get_group(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict(format!(
                    "Version mismatch: expected {}, current {}",
                    expected, existing.version
                )));
            }
        }

        let title = request.title.as_ref().unwrap_or(&existing.title);
        let visibility = request.visibility.unwrap_or(existing.visibility);
        let room_code = request.room_code.as_ref().unwrap_or(&existing.room_code);
        let queued_tags = request
            .queued_tags
            .clone()
            .unwrap_or(existing.queued_tags.clone());
        let queued_json = serde_json::to_string(&queued_tags)?;
        let new_version = existing.version + 1;

        let result = sqlx::query(
            "UPDATE groups SET title = ?, visibility = ?, room_code = ?, queued_tags = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(title)
        .bind(visibility.as_str())
        .bind(room_code)
        .bind(&queued_json)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_to_precondition(e, "Room code already in use"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(
                "Concurrent modification detected".to_string(),
            ));
        }

        Ok(Group {
            id: id.to_string(),
            title: title.clone(),
            room_code: room_code.clone(),
            visibility,
            admin_id: existing.admin_id,
            current_tag: existing.current_tag,
            queued_tags,
            past_tags: existing.past_tags,
            next_tag_switch_at: existing.next_tag_switch_at,
            created_at: existing.created_at,
            version: new_version,
        })
    }

    /// Delete a group and everything keyed by it.
    pub async fn delete_group(&self, id: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Group {} not found", id)));
        }

        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ledger WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM posts WHERE group_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Add a member to a group, creating the zero-default ledger record.
    /// Idempotent: re-joining is a no-op.
    pub async fn add_member(
        &self,
        group_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO ledger (user_id, group_id, streak, points, last_post_at, last_tag_week, version) VALUES (?, ?, 0, 0, NULL, NULL, 1)"
        )
        .bind(user_id)
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Whether the user belongs to the group.
    pub async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Device tokens of all members who registered one.
    pub async fn member_device_tokens(&self, group_id: &str) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query(
            r#"SELECT u.device_token FROM group_members gm
               JOIN users u ON u.id = gm.user_id
               WHERE gm.group_id = ? AND u.device_token IS NOT NULL"#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("device_token")).collect())
    }

    // ==================== LEDGER OPERATIONS ====================

    /// Get the ledger record for one (user, group) pair.
    pub async fn get_ledger(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<Option<LedgerRecord>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, group_id, streak, points, last_post_at, last_tag_week, version FROM ledger WHERE user_id = ? AND group_id = ?"
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(ledger_from_row))
    }

    /// All ledger records for a group (sweep input).
    pub async fn ledger_for_group(&self, group_id: &str) -> Result<Vec<LedgerRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT user_id, group_id, streak, points, last_post_at, last_tag_week, version FROM ledger WHERE group_id = ?"
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(ledger_from_row).collect())
    }

    /// Group standings ordered by points.
    pub async fn leaderboard(&self, group_id: &str) -> Result<Vec<LeaderboardEntry>, AppError> {
        let rows = sqlx::query(
            r#"SELECT l.user_id, COALESCE(u.display_name, '') AS display_name, l.streak, l.points
               FROM ledger l LEFT JOIN users u ON u.id = l.user_id
               WHERE l.group_id = ?
               ORDER BY l.points DESC, l.streak DESC, l.user_id"#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LeaderboardEntry {
                user_id: row.get("user_id"),
                display_name: row.get("display_name"),
                streak: row.get("streak"),
                points: row.get("points"),
            })
            .collect())
    }

    /// Apply a missed-week penalty computed from `record`'s observed state.
    /// The version check guarantees the penalty lands on exactly the points
    /// value it was computed from.
    pub async fn apply_missed_penalty(
        &self,
        record: &LedgerRecord,
        new_points: i64,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE ledger SET streak = 0, points = ?, version = ? WHERE user_id = ? AND group_id = ? AND version = ?"
        )
        .bind(new_points)
        .bind(record.version + 1)
        .bind(&record.user_id)
        .bind(&record.group_id)
        .bind(record.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Concurrent modification of ledger {}/{}",
                record.user_id, record.group_id
            )));
        }
        Ok(())
    }

    // ==================== POST OPERATIONS ====================

    /// Look up a previously-recorded post by its client idempotency key.
    pub async fn find_post_by_client_key(
        &self,
        group_id: &str,
        author_id: &str,
        client_key: &str,
    ) -> Result<Option<Post>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, group_id, author_id, tag, image_url, published_at, liked_by, moderation_status, version
               FROM posts WHERE group_id = ? AND author_id = ? AND client_key = ?"#,
        )
        .bind(group_id)
        .bind(author_id)
        .bind(client_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// Persist a post and the ledger state it produced as one transaction.
    ///
    /// `ledger` carries the already-bumped version; the conditional update
    /// checks against the version the decision was computed from. A race on
    /// either the ledger row or the idempotency index rolls the whole
    /// transaction back as a retryable conflict.
    pub async fn commit_post(
        &self,
        post: &Post,
        client_key: Option<&str>,
        ledger: &LedgerRecord,
        ledger_exists: bool,
    ) -> Result<(), AppError> {
        let liked_json = serde_json::to_string(&post.liked_by)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO posts (
                id, group_id, author_id, tag, image_url, client_key,
                published_at, liked_by, moderation_status, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&post.id)
        .bind(&post.group_id)
        .bind(&post.author_id)
        .bind(&post.tag)
        .bind(&post.image_url)
        .bind(client_key)
        .bind(post.published_at)
        .bind(&liked_json)
        .bind(post.moderation_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_to_conflict(e, "Post"))?;

        if ledger_exists {
            let result = sqlx::query(
                "UPDATE ledger SET streak = ?, points = ?, last_post_at = ?, last_tag_week = ?, version = ? WHERE user_id = ? AND group_id = ? AND version = ?"
            )
            .bind(ledger.streak)
            .bind(ledger.points)
            .bind(ledger.last_post_at)
            .bind(ledger.last_tag_week)
            .bind(ledger.version)
            .bind(&ledger.user_id)
            .bind(&ledger.group_id)
            .bind(ledger.version - 1)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(format!(
                    "Concurrent modification of ledger {}/{}",
                    ledger.user_id, ledger.group_id
                )));
            }
        } else {
            sqlx::query(
                "INSERT INTO ledger (user_id, group_id, streak, points, last_post_at, last_tag_week, version) VALUES (?, ?, ?, ?, ?, ?, ?)"
            )
            .bind(&ledger.user_id)
            .bind(&ledger.group_id)
            .bind(ledger.streak)
            .bind(ledger.points)
            .bind(ledger.last_post_at)
            .bind(ledger.last_tag_week)
            .bind(ledger.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_to_conflict(e, "Ledger record"))?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get a post by ID.
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, group_id, author_id, tag, image_url, published_at, liked_by, moderation_status, version
               FROM posts WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// Delete a post.
    pub async fn delete_post(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }
        Ok(())
    }

    /// Posts published in the current tag-week, rejected ones hidden.
    pub async fn list_week_posts(
        &self,
        group_id: &str,
        week_start: DateTime<Utc>,
    ) -> Result<Vec<Post>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, group_id, author_id, tag, image_url, published_at, liked_by, moderation_status, version
               FROM posts
               WHERE group_id = ? AND published_at >= ? AND moderation_status != 'rejected'
               ORDER BY published_at DESC"#,
        )
        .bind(group_id)
        .bind(week_start)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Record the moderation verdict for a post.
    pub async fn set_moderation_status(
        &self,
        post_id: &str,
        status: ModerationStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE posts SET moderation_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(post_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Post {} not found", post_id)));
        }
        Ok(())
    }

    // ==================== LIKE OPERATIONS ====================

    /// Apply a like toggle: the post's like set, the author's aggregate like
    /// counter, and the author's point balance move together or not at all.
    /// Returns the author's resulting (total_likes, points).
    pub async fn apply_like_toggle(
        &self,
        post: &Post,
        new_liked_by: &[String],
        delta: i64,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64), AppError> {
        let liked_json = serde_json::to_string(new_liked_by)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE posts SET liked_by = ?, version = ? WHERE id = ? AND version = ?")
            .bind(&liked_json)
            .bind(post.version + 1)
            .bind(&post.id)
            .bind(post.version)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Concurrent modification of post {}",
                post.id
            )));
        }

        let result = sqlx::query(
            "UPDATE users SET total_likes = total_likes + ?, updated_at = ?, version = version + 1 WHERE id = ?"
        )
        .bind(delta)
        .bind(now)
        .bind(&post.author_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Author {} not found",
                post.author_id
            )));
        }

        let result = sqlx::query(
            "UPDATE ledger SET points = points + ?, version = version + 1 WHERE user_id = ? AND group_id = ?"
        )
        .bind(delta)
        .bind(&post.author_id)
        .bind(&post.group_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Ledger record {}/{} not found",
                post.author_id, post.group_id
            )));
        }

        let totals = sqlx::query(
            r#"SELECT u.total_likes, l.points FROM users u, ledger l
               WHERE u.id = ? AND l.user_id = ? AND l.group_id = ?"#,
        )
        .bind(&post.author_id)
        .bind(&post.author_id)
        .bind(&post.group_id)
        .fetch_one(&mut *tx)
        .await?;

        let total_likes: i64 = totals.get("total_likes");
        let points: i64 = totals.get("points");

        tx.commit().await?;
        Ok((total_likes, points))
    }

    /// Best-effort "who liked" audit entry, written outside the like
    /// transaction.
    pub async fn insert_like_audit(
        &self,
        post_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("INSERT INTO like_audit (post_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(post_id)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== ROTATION OPERATIONS ====================

    /// Advance a group's tag state. The version check makes concurrent
    /// firings for the same deadline resolve to exactly one rotation.
    pub async fn apply_rotation(
        &self,
        group_id: &str,
        expected_version: i64,
        current_tag: &str,
        queued_tags: &[String],
        past_tags: &[String],
        next_tag_switch_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let queued_json = serde_json::to_string(queued_tags)?;
        let past_json = serde_json::to_string(past_tags)?;

        let result = sqlx::query(
            "UPDATE groups SET current_tag = ?, queued_tags = ?, past_tags = ?, next_tag_switch_at = ?, version = ? WHERE id = ? AND version = ?"
        )
        .bind(current_tag)
        .bind(&queued_json)
        .bind(&past_json)
        .bind(next_tag_switch_at)
        .bind(expected_version + 1)
        .bind(group_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Concurrent modification of group {}",
                group_id
            )));
        }
        Ok(())
    }
}

// Test-only state seeding: integration tests need to place groups and
// ledgers at specific points in time without replaying weeks of history.
#[cfg(test)]
impl Repository {
    pub async fn seed_next_switch(
        &self,
        group_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE groups SET next_tag_switch_at = ? WHERE id = ?")
            .bind(at)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn seed_ledger(&self, record: &LedgerRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO ledger (user_id, group_id, streak, points, last_post_at, last_tag_week, version)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, group_id) DO UPDATE SET
                   streak = excluded.streak, points = excluded.points,
                   last_post_at = excluded.last_post_at, last_tag_week = excluded.last_tag_week,
                   version = excluded.version"#,
        )
        .bind(&record.user_id)
        .bind(&record.group_id)
        .bind(record.streak)
        .bind(record.points)
        .bind(record.last_post_at)
        .bind(record.last_tag_week)
        .bind(record.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// Helper functions for row conversion

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        display_name: row.get("display_name"),
        device_token: row.get("device_token"),
        total_likes: row.get("total_likes"),
        updated_at: row.get("updated_at"),
        version: row.get("version"),
    }
}

fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> Group {
    let visibility_str: String = row.get("visibility");
    let queued_str: String = row.get("queued_tags");
    let past_str: String = row.get("past_tags");
    Group {
        id: row.get("id"),
        title: row.get("title"),
        room_code: row.get("room_code"),
        visibility: Visibility::from_str(&visibility_str)
            .unwrap_or(Visibility::PrivateCodeRequired),
        admin_id: row.get("admin_id"),
        current_tag: row.get("current_tag"),
        queued_tags: parse_json_array(&queued_str),
        past_tags: parse_json_array(&past_str),
        next_tag_switch_at: row.get("next_tag_switch_at"),
        created_at: row.get("created_at"),
        version: row.get("version"),
    }
}

fn ledger_from_row(row: &sqlx::sqlite::SqliteRow) -> LedgerRecord {
    LedgerRecord {
        user_id: row.get("user_id"),
        group_id: row.get("group_id"),
        streak: row.get("streak"),
        points: row.get("points"),
        last_post_at: row.get("last_post_at"),
        last_tag_week: row.get("last_tag_week"),
        version: row.get("version"),
    }
}

fn post_from_row(row: &sqlx::sqlite::SqliteRow) -> Post {
    let liked_str: String = row.get("liked_by");
    let status_str: String = row.get("moderation_status");
    Post {
        id: row.get("id"),
        group_id: row.get("group_id"),
        author_id: row.get("author_id"),
        tag: row.get("tag"),
        image_url: row.get("image_url"),
        published_at: row.get("published_at"),
        liked_by: parse_json_array(&liked_str),
        moderation_status: ModerationStatus::from_str(&status_str)
            .unwrap_or(ModerationStatus::Pending),
        version: row.get("version"),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Map a unique-constraint violation to a retryable conflict.
fn unique_to_conflict(err: sqlx::Error, what: &str) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return AppError::Conflict(format!("{} already exists", what));
        }
    }
    err.into()
}

/// Map a unique-constraint violation to a user-facing precondition failure.
fn unique_to_precondition(err: sqlx::Error, message: &str) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return AppError::PreconditionFailed(message.to_string());
        }
    }
    err.into()
}
