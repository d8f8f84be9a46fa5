use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use stella_types::api::{DailyProgressQuery, DailyProgressResponse, StreakResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Without `?date=` this reports the user's current local day.
pub async fn daily_progress(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<DailyProgressQuery>,
) -> Result<Json<DailyProgressResponse>, ApiError> {
    let now = state.now();
    let progress = state
        .read(move |db| {
            let date = match query.date {
                Some(date) => date,
                None => db.get_user(user_id)?.local_date(now),
            };
            db.get_daily_progress(user_id, date)
        })
        .await?;
    Ok(Json(progress.into()))
}

pub async fn streak(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<StreakResponse>, ApiError> {
    let streak = state.read(move |db| db.get_streak(user_id)).await?;
    Ok(Json(streak.into()))
}
