//! Like/point transaction engine: toggles a (user, post) like edge and
//! keeps the post's like set, the author's aggregate like counter, and the
//! author's point balance consistent.

use chrono::{DateTime, Utc};

use crate::db::Repository;
use crate::errors::AppError;
use crate::events::{AppEvent, EventBus};
use crate::models::LikeReceipt;

use super::MAX_TXN_RETRIES;

/// Toggle `liker_id`'s like on `post_id`. Retried on conflict with fresh
/// reads; retrying with identical inputs after an ambiguous failure is safe
/// (at worst the caller toggles twice, a like followed by an unlike).
pub async fn toggle_like(
    repo: &Repository,
    bus: &EventBus,
    liker_id: &str,
    post_id: &str,
    now: DateTime<Utc>,
) -> Result<LikeReceipt, AppError> {
    for _attempt in 0..MAX_TXN_RETRIES {
        // Re-read each attempt: the like set decides add vs. remove.
        let post = repo
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;

        let already_liked = post.liked_by.iter().any(|id| id == liker_id);
        let delta: i64 = if already_liked { -1 } else { 1 };

        let mut new_liked_by = post.liked_by.clone();
        if already_liked {
            new_liked_by.retain(|id| id != liker_id);
        } else {
            new_liked_by.push(liker_id.to_string());
        }

        match repo.apply_like_toggle(&post, &new_liked_by, delta, now).await {
            Ok((author_total_likes, author_points)) => {
                if !already_liked {
                    // Best-effort audit trail; never rolls back the toggle.
                    if let Err(e) = repo.insert_like_audit(post_id, liker_id, now).await {
                        tracing::warn!(post = post_id, "like audit write failed: {}", e);
                    }
                }

                bus.emit(AppEvent::LikeToggled {
                    post_id: post_id.to_string(),
                    group_id: post.group_id.clone(),
                    author_id: post.author_id.clone(),
                    liker_id: liker_id.to_string(),
                    liked: !already_liked,
                });

                return Ok(LikeReceipt {
                    post_id: post_id.to_string(),
                    liked: !already_liked,
                    like_count: new_liked_by.len() as i64,
                    author_total_likes,
                    author_points,
                });
            }
            Err(AppError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Conflict(format!(
        "Could not toggle like on {} after {} attempts",
        post_id, MAX_TXN_RETRIES
    )))
}
