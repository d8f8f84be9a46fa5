use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use stella_types::api::{
    ActingUserRequest, FriendRequestResponse, FriendRequestSummary, FriendResponse,
    FriendshipAction, FriendshipResponse, RelationshipResponse, SendFriendRequest,
    UpdateFriendshipRequest,
};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn send_request(
    State(state): State<AppState>,
    Json(req): Json<SendFriendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.now();
    let friendship = state
        .write(move |db| db.send_friend_request(req.sender_id, req.receiver_id, now))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(FriendRequestResponse {
            friendship_id: friendship.id,
        }),
    ))
}

/// Accept answers 200 with the now-accepted friendship; reject deletes the
/// request and answers 204.
pub async fn update_request(
    State(state): State<AppState>,
    Path(friendship_id): Path<Uuid>,
    Json(req): Json<UpdateFriendshipRequest>,
) -> Result<Response, ApiError> {
    let now = state.now();
    let acting = req.acting_user_id;

    match req.action {
        FriendshipAction::Accept => {
            let friendship = state
                .write(move |db| db.accept_friend_request(friendship_id, acting, now))
                .await?;
            Ok(Json(FriendshipResponse::from(friendship)).into_response())
        }
        FriendshipAction::Reject => {
            state
                .write(move |db| db.reject_friend_request(friendship_id, acting, now))
                .await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

pub async fn unfriend(
    State(state): State<AppState>,
    Path(friendship_id): Path<Uuid>,
    Json(req): Json<ActingUserRequest>,
) -> Result<StatusCode, ApiError> {
    let now = state.now();
    state
        .write(move |db| db.unfriend(friendship_id, req.acting_user_id, now))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_friends(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<FriendResponse>>, ApiError> {
    let friends = state.read(move |db| db.list_friends(user_id)).await?;

    Ok(Json(
        friends
            .into_iter()
            .map(|f| FriendResponse {
                friendship_id: f.friendship_id,
                user_id: f.user.id,
                username: f.user.username,
                avatar_ref: f.user.avatar_ref,
            })
            .collect(),
    ))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<FriendRequestSummary>>, ApiError> {
    let pending = state.read(move |db| db.list_pending_received(user_id)).await?;

    Ok(Json(
        pending
            .into_iter()
            .map(|p| FriendRequestSummary {
                friendship_id: p.friendship.id,
                sender_id: p.sender.id,
                sender_username: p.sender.username,
                sender_avatar_ref: p.sender.avatar_ref,
                created_at: p.friendship.created_at,
            })
            .collect(),
    ))
}

pub async fn relationship(
    State(state): State<AppState>,
    Path((user_id, other_user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<RelationshipResponse>, ApiError> {
    let status = state
        .read(move |db| db.relationship_between(user_id, other_user_id))
        .await?;

    Ok(Json(RelationshipResponse {
        user_id,
        other_user_id,
        status,
    }))
}
