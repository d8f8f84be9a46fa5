use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stella_db::{Database, EngineError};
use stella_types::events::{FanoutEvent, GatewayCommand, GatewayFrame};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may stay silent before sending Subscribe.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

fn frame_message(frame: &GatewayFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("failed to encode gateway frame: {}", e);
            None
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Drive one WebSocket: wait for `Subscribe`, reply `Ready`, then forward
/// that user's fan-out events until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_subscribe(&mut receiver).await else {
        warn!("WebSocket client did not subscribe, closing");
        return;
    };

    let lookup = tokio::task::spawn_blocking(move || db.get_user(user_id)).await;
    match lookup {
        Ok(Ok(user)) => info!("{} ({}) subscribed to gateway", user.username, user_id),
        Ok(Err(EngineError::NotFound(_))) => {
            warn!("subscribe for unknown user {}, closing", user_id);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
        Ok(Err(e)) => {
            error!("user lookup failed for gateway subscribe: {}", e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    }

    // Register before Ready so every event committed after Ready is seen.
    let (conn_id, events_rx) = dispatcher.subscribe(user_id).await;

    let sent = match frame_message(&GatewayFrame::Ready { user_id }) {
        Some(ready) => sender.send(ready).await.is_ok(),
        None => false,
    };
    if sent {
        run_connection_loop(sender, receiver, events_rx, user_id).await;
    }

    dispatcher.unsubscribe(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_subscribe(receiver: &mut SplitStream<WebSocket>) -> Option<Uuid> {
    let wait = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Subscribe { user_id }) => return Some(user_id),
                    Err(e) => warn!("bad gateway command: {} -- raw: {}", e, preview(&text)),
                },
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    });

    wait.await.ok().flatten()
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events_rx: UnboundedReceiver<FanoutEvent>,
    user_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward fan-out events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(msg) = frame_message(&GatewayFrame::Fanout(event)) else {
                        continue;
                    };
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Clients only subscribe once; later traffic is pongs and close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("{} sent unexpected command: {}", user_id, preview(&text));
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
