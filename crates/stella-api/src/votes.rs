use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use stella_types::api::{CastVoteRequest, RatingResponse};
use stella_types::models::Rating;

use crate::error::ApiError;
use crate::state::AppState;

fn rating_response(rating: Rating) -> RatingResponse {
    RatingResponse {
        average_rating: rating.average(),
        vote_count: rating.vote_count,
    }
}

/// Cast or change a vote. Either way the response is the post's new rating.
pub async fn cast_vote(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<CastVoteRequest>,
) -> Result<Json<RatingResponse>, ApiError> {
    let now = state.now();
    let outcome = state
        .write(move |db| db.cast_vote(req.voter_id, post_id, req.stars, now))
        .await?;
    Ok(Json(rating_response(outcome.rating)))
}

pub async fn get_rating(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<RatingResponse>, ApiError> {
    let now = state.now();
    let rating = state.read(move |db| db.get_rating(post_id, now)).await?;
    Ok(Json(rating_response(rating)))
}
