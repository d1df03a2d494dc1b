//! Streak engine: decides how a qualifying post changes a member's ledger,
//! and records posts transactionally.
//!
//! The decision functions are pure; all store effects go through the
//! repository's conditional writes. The week key is always derived from the
//! group's `next_tag_switch_at`, the same cadence the rotation scheduler
//! advances, so ledger and scheduler can never disagree about which week
//! "now" belongs to.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::Repository;
use crate::errors::AppError;
use crate::events::{AppEvent, EventBus};
use crate::models::{CreatePostRequest, LedgerRecord, ModerationStatus, Post, PostReceipt};
use crate::week;

use super::MAX_TXN_RETRIES;

/// The ledger change a qualifying post produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostDecision {
    pub streak: i64,
    pub points_delta: i64,
}

/// Decide streak/points for a post landing in the week starting at
/// `week_start`.
///
/// Same week again: a standing streak means the post already counted, so
/// nothing changes; a zero streak means this is the first qualifying post
/// of a week in which the streak was reset earlier, so it starts a new one.
/// A post exactly one week after the last starts is the consecutive-week
/// continuation. Anything else (never posted, a gap of more than a week,
/// or an out-of-order week key) starts over at one.
pub fn decide_post(
    streak: i64,
    last_tag_week: Option<DateTime<Utc>>,
    week_start: DateTime<Utc>,
) -> PostDecision {
    match last_tag_week {
        Some(last) if last == week_start => {
            if streak > 0 {
                PostDecision {
                    streak,
                    points_delta: 0,
                }
            } else {
                PostDecision {
                    streak: 1,
                    points_delta: 2,
                }
            }
        }
        Some(last) if last == week_start - week::week_length() => {
            let new_streak = streak + 1;
            PostDecision {
                streak: new_streak,
                points_delta: 2 * new_streak,
            }
        }
        _ => PostDecision {
            streak: 1,
            points_delta: 2,
        },
    }
}

/// Decide the penalty for a member who missed the week starting at
/// `week_start`. Returns `None` when there is nothing to do; otherwise the
/// number of points to deduct (20% of the balance, rounded up, never more
/// than the balance itself).
pub fn missed_week_penalty(
    streak: i64,
    points: i64,
    last_tag_week: Option<DateTime<Utc>>,
    week_start: DateTime<Utc>,
) -> Option<i64> {
    if streak <= 0 {
        return None;
    }
    let missed = last_tag_week.map_or(true, |last| last < week_start);
    if !missed {
        return None;
    }
    let penalty = if points > 0 { (points + 4) / 5 } else { 0 };
    Some(penalty)
}

/// Record a post for `author_id` in `group_id` and apply the resulting
/// streak/point change as one transaction. Retries bounded on conflict;
/// safe to call concurrently with the sweep or other posts.
pub async fn record_post(
    repo: &Repository,
    bus: &EventBus,
    group_id: &str,
    author_id: &str,
    request: &CreatePostRequest,
    now: DateTime<Utc>,
) -> Result<PostReceipt, AppError> {
    let group = repo
        .get_group(group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))?;

    // The author's user row must exist before any like can touch its
    // aggregate counter.
    repo.ensure_user(author_id, now).await?;

    // A retried create with the same idempotency key returns the original
    // post instead of double-counting.
    if let Some(key) = request.client_key.as_deref() {
        if let Some(existing) = repo.find_post_by_client_key(group_id, author_id, key).await? {
            return replay_receipt(repo, existing, group_id, author_id).await;
        }
    }

    let week_start = week::current_week_start(group.next_tag_switch_at);

    for _attempt in 0..MAX_TXN_RETRIES {
        let (current, exists) = match repo.get_ledger(author_id, group_id).await? {
            Some(rec) => (rec, true),
            None => (LedgerRecord::new(author_id, group_id), false),
        };

        let decision = decide_post(current.streak, current.last_tag_week, week_start);

        let updated = LedgerRecord {
            streak: decision.streak,
            points: current.points + decision.points_delta,
            last_post_at: Some(now),
            last_tag_week: Some(week_start),
            version: if exists { current.version + 1 } else { 1 },
            ..current
        };

        let post = Post {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.to_string(),
            author_id: author_id.to_string(),
            tag: group.current_tag.clone(),
            image_url: request.image_url.clone(),
            published_at: now,
            liked_by: Vec::new(),
            moderation_status: ModerationStatus::Pending,
            version: 1,
        };

        match repo
            .commit_post(&post, request.client_key.as_deref(), &updated, exists)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    group = group_id,
                    author = author_id,
                    streak = updated.streak,
                    points = updated.points,
                    delta = decision.points_delta,
                    "post recorded"
                );
                bus.emit(AppEvent::PostCreated {
                    post_id: post.id.clone(),
                    group_id: group_id.to_string(),
                    author_id: author_id.to_string(),
                    image_url: post.image_url.clone(),
                });
                return Ok(PostReceipt {
                    post,
                    streak: updated.streak,
                    points: updated.points,
                    points_delta: decision.points_delta,
                });
            }
            Err(AppError::Conflict(_)) => {
                // A concurrent create with the same key may have won the race.
                if let Some(key) = request.client_key.as_deref() {
                    if let Some(existing) =
                        repo.find_post_by_client_key(group_id, author_id, key).await?
                    {
                        return replay_receipt(repo, existing, group_id, author_id).await;
                    }
                }
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Conflict(format!(
        "Could not record post for {} in {} after {} attempts",
        author_id, group_id, MAX_TXN_RETRIES
    )))
}

/// Receipt for an idempotent replay: the original post with the ledger as
/// it stands now, and no new delta.
async fn replay_receipt(
    repo: &Repository,
    post: Post,
    group_id: &str,
    author_id: &str,
) -> Result<PostReceipt, AppError> {
    let ledger = repo
        .get_ledger(author_id, group_id)
        .await?
        .unwrap_or_else(|| LedgerRecord::new(author_id, group_id));
    Ok(PostReceipt {
        post,
        streak: ledger.streak,
        points: ledger.points,
        points_delta: 0,
    })
}
