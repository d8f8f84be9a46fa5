mod common;

use std::time::Duration;

use axum_test::{TestWebSocket, WsMessage};
use serde_json::{Value, json};
use uuid::Uuid;

use common::TestHarness;

async fn connect(harness: &TestHarness) -> TestWebSocket {
    harness
        .server
        .get_websocket("/gateway")
        .await
        .into_websocket()
        .await
}

async fn subscribe(ws: &mut TestWebSocket, user_id: Uuid) {
    ws.send_json(&json!({ "type": "Subscribe", "data": { "userId": user_id } }))
        .await;
}

async fn next_json(ws: &mut TestWebSocket) -> Value {
    tokio::time::timeout(Duration::from_secs(5), ws.receive_json())
        .await
        .expect("no frame within 5s")
}

#[tokio::test]
async fn subscribe_gets_ready_then_fanout() {
    let harness = TestHarness::new_http();
    let alice = harness.create_user("alice").await;
    let bob = harness.create_user("bob").await;

    let mut ws = connect(&harness).await;
    subscribe(&mut ws, alice).await;
    let ready = next_json(&mut ws).await;
    assert_eq!(ready["type"], "Ready");
    assert_eq!(ready["data"]["userId"], alice.to_string());
    // Registered by the time Ready arrives.
    assert_eq!(harness.relay.dispatcher().connection_count(alice).await, 1);

    harness
        .server
        .post("/friendships")
        .json(&json!({ "senderId": bob, "receiverId": alice }))
        .await
        .assert_status_success();
    harness.relay.drain().await.unwrap();

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "Fanout");
    assert_eq!(frame["data"]["type"], "friendship-changed");
    assert_eq!(frame["data"]["userId"], alice.to_string());
    assert_eq!(frame["data"]["payload"]["change"], "requested");
    assert_eq!(frame["data"]["payload"]["otherUserId"], bob.to_string());
}

#[tokio::test]
async fn garbage_before_subscribe_is_ignored() {
    let harness = TestHarness::new_http();
    let alice = harness.create_user("alice").await;

    let mut ws = connect(&harness).await;
    ws.send_text("hello?").await;
    subscribe(&mut ws, alice).await;

    let ready = next_json(&mut ws).await;
    assert_eq!(ready["type"], "Ready");
}

#[tokio::test]
async fn unknown_user_is_closed() {
    let harness = TestHarness::new_http();
    let ghost = Uuid::new_v4();

    let mut ws = connect(&harness).await;
    subscribe(&mut ws, ghost).await;

    let message = tokio::time::timeout(Duration::from_secs(5), ws.receive_message())
        .await
        .expect("no close within 5s");
    assert!(matches!(message, WsMessage::Close(_)));
    assert_eq!(harness.relay.dispatcher().connection_count(ghost).await, 0);
}
