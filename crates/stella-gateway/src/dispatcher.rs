use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use stella_types::events::FanoutEvent;

type Subscribers = HashMap<Uuid, mpsc::UnboundedSender<FanoutEvent>>;

/// Routes fan-out events to every live connection subscribed to a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> sender). A user may be connected from several devices.
    subscribers: RwLock<HashMap<Uuid, Subscribers>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn subscribe(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<FanoutEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop one connection. Other connections of the same user are untouched.
    pub async fn unsubscribe(&self, user_id: Uuid, conn_id: Uuid) {
        let mut subscribers = self.inner.subscribers.write().await;
        if let Some(conns) = subscribers.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                subscribers.remove(&user_id);
            }
        }
    }

    /// Deliver to every subscriber of `event.user_id`. Returns how many
    /// connections received it. Closed receivers are pruned.
    pub async fn publish(&self, event: &FanoutEvent) -> usize {
        let mut subscribers = self.inner.subscribers.write().await;
        let Some(conns) = subscribers.get_mut(&event.user_id) else {
            return 0;
        };

        conns.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = conns.len();
        if delivered == 0 {
            subscribers.remove(&event.user_id);
            debug!(user_id = %event.user_id, "pruned closed subscribers");
        }
        delivered
    }

    /// Number of live connections for `user_id`.
    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
