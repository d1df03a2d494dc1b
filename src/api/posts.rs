//! Post and like API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::engine::{likes, streak};
use crate::errors::AppError;
use crate::models::{CreatePostRequest, LikeReceipt, Post, PostReceipt};
use crate::week;
use crate::AppState;

/// POST /api/groups/:id/posts - Post a photo; awards streak/points.
pub async fn create_post(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(group_id): Path<String>,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<PostReceipt> {
    if request.image_url.trim().is_empty() {
        return Err(AppError::Validation("Image URL is required".to_string()));
    }

    let receipt = streak::record_post(
        &state.repo,
        &state.bus,
        &group_id,
        &user_id,
        &request,
        Utc::now(),
    )
    .await?;

    success(receipt)
}

/// GET /api/groups/:id/posts - The current tag-week's feed; rejected posts
/// are hidden.
pub async fn list_week_posts(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Vec<Post>> {
    let group = state
        .repo
        .get_group(&group_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))?;

    let week_start = week::current_week_start(group.next_tag_switch_at);
    let posts = state.repo.list_week_posts(&group_id, week_start).await?;
    success(posts)
}

/// DELETE /api/posts/:id - Delete a post (author or group admin).
///
/// Accrued like-derived points are left in place; only the post and its
/// stored image go away.
pub async fn delete_post(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let post = state
        .repo
        .get_post(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))?;

    let is_admin = state
        .repo
        .get_group(&post.group_id)
        .await?
        .map(|g| g.admin_id == user_id)
        .unwrap_or(false);

    if post.author_id != user_id && !is_admin {
        return Err(AppError::Forbidden(
            "Only the author or the group admin can delete a post".to_string(),
        ));
    }

    state.repo.delete_post(&id).await?;

    // Image cleanup is best-effort and off the request path.
    if let Some(blobs) = state.blobs.clone() {
        let image_url = post.image_url.clone();
        tokio::spawn(async move {
            if let Err(e) = blobs.delete(&image_url).await {
                tracing::warn!("blob delete failed for {}: {}", image_url, e);
            }
        });
    }

    success(())
}

/// POST /api/posts/:id/like - Toggle the caller's like on a post.
pub async fn toggle_like(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<LikeReceipt> {
    let receipt = likes::toggle_like(&state.repo, &state.bus, &user_id, &id, Utc::now()).await?;
    success(receipt)
}
