//! Group API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::engine::rotation;
use crate::errors::AppError;
use crate::models::{
    generate_room_code, CreateGroupRequest, Group, JoinGroupRequest, LeaderboardEntry,
    UpdateGroupSettingsRequest, Visibility,
};
use crate::week;
use crate::AppState;

/// How many times group creation retries a colliding room code.
const ROOM_CODE_ATTEMPTS: usize = 5;

/// POST /api/groups - Create a new group; the caller becomes its admin.
pub async fn create_group(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CreateGroupRequest>,
) -> ApiResult<Group> {
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }

    let now = Utc::now();
    state.repo.ensure_user(&user_id, now).await?;

    let mut last_err = None;
    for _attempt in 0..ROOM_CODE_ATTEMPTS {
        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title.trim().to_string(),
            room_code: generate_room_code(),
            visibility: request.visibility.unwrap_or(Visibility::PrivateCodeRequired),
            admin_id: user_id.clone(),
            current_tag: request.current_tag.clone().unwrap_or_default(),
            queued_tags: request.queued_tags.clone().unwrap_or_default(),
            past_tags: Vec::new(),
            next_tag_switch_at: week::next_rotation_after(now),
            created_at: now,
            version: 1,
        };

        match state.repo.create_group(&group, now).await {
            Ok(()) => return success(group),
            Err(AppError::Conflict(msg)) => {
                // Room code collision; roll a new one
                last_err = Some(AppError::Conflict(msg));
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        AppError::Internal("Could not allocate a room code".to_string())
    }))
}

/// GET /api/groups - List discoverable groups.
pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Vec<Group>> {
    let groups = state.repo.list_public_groups().await?;
    success(groups)
}

/// GET /api/groups/:id - Get a single group.
pub async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Group> {
    let group = state
        .repo
        .get_group(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;
    success(group)
}

/// POST /api/groups/join - Join a group by room code.
pub async fn join_group(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<JoinGroupRequest>,
) -> ApiResult<Group> {
    let group = state
        .repo
        .find_group_by_room_code(request.room_code.trim())
        .await?
        .ok_or_else(|| AppError::NotFound("No group with that room code".to_string()))?;

    let now = Utc::now();
    state.repo.ensure_user(&user_id, now).await?;
    state.repo.add_member(&group.id, &user_id, now).await?;

    success(group)
}

/// POST /api/groups/:id/settings - Update group metadata (admin only).
/// Never rotates; tag state moves only via the scheduler or the on-demand
/// check.
pub async fn update_settings(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Json(request): Json<UpdateGroupSettingsRequest>,
) -> ApiResult<Group> {
    let group = state
        .repo
        .get_group(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;

    if group.admin_id != user_id {
        return Err(AppError::Forbidden(
            "Only the group admin can change settings".to_string(),
        ));
    }

    if let Some(title) = &request.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("Title must not be empty".to_string()));
        }
    }
    if let Some(code) = &request.room_code {
        if code.trim().is_empty() {
            return Err(AppError::Validation(
                "Room code must not be empty".to_string(),
            ));
        }
    }

    let updated = state.repo.update_group_settings(&id, &request).await?;
    success(updated)
}

/// Result of an on-demand rotation check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateResponse {
    pub rotated: bool,
    pub group: Group,
}

/// POST /api/groups/:id/rotate - Opportunistic rotation check. Idempotent:
/// a group whose deadline is still ahead is left untouched.
pub async fn rotate_now(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<RotateResponse> {
    if !state.repo.is_member(&id, &user_id).await? {
        return Err(AppError::Forbidden(
            "Only members can trigger a rotation check".to_string(),
        ));
    }

    let rotated =
        rotation::check_and_rotate_if_due(&state.repo, &state.bus, &id, Utc::now()).await?;

    let group = state
        .repo
        .get_group(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;

    success(RotateResponse { rotated, group })
}

/// DELETE /api/groups/:id - Delete a group and all dependent state (admin
/// only).
pub async fn delete_group(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let group = state
        .repo
        .get_group(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))?;

    if group.admin_id != user_id {
        return Err(AppError::Forbidden(
            "Only the group admin can delete the group".to_string(),
        ));
    }

    state.repo.delete_group(&id).await?;
    success(())
}

/// GET /api/groups/:id/leaderboard - Standings by points.
pub async fn leaderboard(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    if state.repo.get_group(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Group {} not found", id)));
    }
    let entries = state.repo.leaderboard(&id).await?;
    success(entries)
}
