use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use stella_types::api::{EventQuery, EventResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Newest-first activity where the user is the actor.
pub async fn list_events(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let events = state
        .read(move |db| {
            db.get_user(user_id)?;
            db.list_events(user_id, query.limit)
        })
        .await?;
    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}
