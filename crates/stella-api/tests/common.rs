//! Shared harness for API integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::{Value, json};
use tempfile::TempDir;
use uuid::Uuid;

use stella_api::{AppStateInner, create_router};
use stella_db::Database;
use stella_gateway::dispatcher::Dispatcher;
use stella_gateway::relay::{OutboxRelay, RelayConfig};

pub struct TestHarness {
    pub server: TestServer,
    pub db: Arc<Database>,
    pub relay: OutboxRelay,
    /// Kept alive for the test's duration.
    pub _temp_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Served over a real socket, which WebSocket tests need.
    pub fn new_http() -> Self {
        Self::build(true)
    }

    fn build(http_transport: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Arc::new(
            Database::open(&temp_dir.path().join("stella.db")).expect("Failed to open database"),
        );
        let relay = OutboxRelay::new(db.clone(), Dispatcher::new(), RelayConfig::default());
        let state = AppStateInner::new(db.clone(), relay.clone(), Duration::from_secs(10));

        let mut builder = TestServer::builder();
        if http_transport {
            builder = builder.http_transport();
        }
        let server = builder
            .build(create_router(state))
            .expect("Failed to create test server");

        Self {
            server,
            db,
            relay,
            _temp_dir: temp_dir,
        }
    }

    pub async fn create_user(&self, username: &str) -> Uuid {
        let response = self
            .server
            .post("/users")
            .json(&json!({ "username": username }))
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        body["userId"].as_str().expect("userId").parse().expect("uuid")
    }

    pub async fn create_post(&self, author_id: Uuid, kind: &str) -> Uuid {
        let response = self
            .server
            .post("/posts")
            .json(&json!({
                "authorId": author_id,
                "text": "sunset",
                "selfRating": 4,
                "kind": kind,
            }))
            .await;
        response.assert_status_success();
        let body: Value = response.json();
        body["postId"].as_str().expect("postId").parse().expect("uuid")
    }

    pub async fn vote(&self, voter_id: Uuid, post_id: Uuid, stars: i64) -> axum_test::TestResponse {
        self.server
            .post(&format!("/posts/{post_id}/votes"))
            .json(&json!({ "voterId": voter_id, "stars": stars }))
            .await
    }

    pub async fn befriend(&self, a: Uuid, b: Uuid) -> Uuid {
        let response = self
            .server
            .post("/friendships")
            .json(&json!({ "senderId": a, "receiverId": b }))
            .await;
        let body: Value = response.json();
        let id: Uuid = body["friendshipId"].as_str().expect("friendshipId").parse().expect("uuid");

        self.server
            .patch(&format!("/friendships/{id}"))
            .json(&json!({ "actingUserId": b, "action": "accept" }))
            .await
            .assert_status_ok();
        id
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn error_code(response: &axum_test::TestResponse) -> String {
    let body: Value = response.json();
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}
