use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::{Value, json};

use stella_gateway::connection;

use crate::state::AppState;
use crate::{events, friendships, posts, progress, users, votes};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", post(users::create_user))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/friends", get(friendships::list_friends))
        .route("/users/{id}/friend-requests", get(friendships::list_requests))
        .route(
            "/users/{id}/relationship/{other_id}",
            get(friendships::relationship),
        )
        .route("/users/{id}/daily-progress", get(progress::daily_progress))
        .route("/users/{id}/streak", get(progress::streak))
        .route("/users/{id}/events", get(events::list_events))
        .route("/posts", post(posts::create_post))
        .route("/posts/{id}", get(posts::get_post).delete(posts::delete_post))
        .route("/posts/{id}/votes", post(votes::cast_vote))
        .route("/posts/{id}/rating", get(votes::get_rating))
        .route("/feed", get(posts::feed))
        .route("/friendships", post(friendships::send_request))
        .route(
            "/friendships/{id}",
            patch(friendships::update_request).delete(friendships::unfriend),
        )
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher().clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db))
}
