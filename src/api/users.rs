//! User profile API endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::models::{UpsertProfileRequest, UserProfile};
use crate::AppState;

/// PUT /api/users/me - Create or update the caller's profile (display name,
/// push device token).
pub async fn upsert_me(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<UpsertProfileRequest>,
) -> ApiResult<UserProfile> {
    let profile = state.repo.upsert_profile(&user_id, &request).await?;
    success(profile)
}
