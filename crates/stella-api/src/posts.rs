use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use stella_db::posts::FeedItem;
use stella_types::api::{
    ActingUserRequest, CreatePostRequest, CreatePostResponse, FeedQuery, PostResponse,
};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostQuery {
    pub viewer_id: Option<Uuid>,
}

fn post_response(item: FeedItem) -> PostResponse {
    let expires_at = item.post.expires_at();
    PostResponse {
        id: item.post.id,
        author_id: item.post.author_id,
        author_username: item.author_username,
        author_avatar_ref: item.author_avatar_ref,
        text: item.post.text,
        image_ref: item.post.image_ref,
        self_rating: item.post.self_rating,
        kind: item.post.kind,
        created_at: item.post.created_at,
        expires_at,
        average_rating: item.rating.average(),
        vote_count: item.rating.vote_count,
        viewer_vote: item.viewer_vote,
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = state.now();
    let created = state
        .write(move |db| {
            db.create_post(
                req.author_id,
                req.text.as_deref(),
                req.image_ref.as_deref(),
                req.self_rating,
                req.kind,
                now,
            )
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePostResponse {
            post_id: created.post.id,
        }),
    ))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<PostQuery>,
) -> Result<Json<PostResponse>, ApiError> {
    let now = state.now();
    let item = state
        .read(move |db| db.get_post(post_id, query.viewer_id, now))
        .await?;
    Ok(Json(post_response(item)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<ActingUserRequest>,
) -> Result<StatusCode, ApiError> {
    let now = state.now();
    state
        .write(move |db| db.delete_post(post_id, req.acting_user_id, now))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let now = state.now();
    let items = state
        .read(move |db| db.feed(query.viewer_id, query.filter, now, query.limit))
        .await?;
    Ok(Json(items.into_iter().map(post_response).collect()))
}
