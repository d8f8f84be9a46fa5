use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use stella_types::api::{CreateUserRequest, CreateUserResponse, UserProfileResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.now();
    let user = state
        .write(move |db| {
            db.create_user(
                req.username.trim(),
                req.avatar_ref.as_deref(),
                req.utc_offset_minutes.unwrap_or(0),
                now,
            )
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreateUserResponse { user_id: user.id })))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserProfileResponse>, ApiError> {
    let (user, stats) = state
        .read(move |db| Ok((db.get_user(user_id)?, db.user_stats(user_id)?)))
        .await?;

    Ok(Json(UserProfileResponse {
        id: user.id,
        username: user.username,
        avatar_ref: user.avatar_ref,
        utc_offset_minutes: user.utc_offset_minutes,
        created_at: user.created_at,
        post_count: stats.post_count,
        vote_count: stats.vote_count,
    }))
}
