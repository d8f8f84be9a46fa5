use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use stella_db::{Database, EngineError};

use crate::dispatcher::Dispatcher;

/// Rows pulled from the outbox per drain round.
const BATCH_SIZE: u32 = 256;

/// Retention pruning runs at most this often.
const PRUNE_EVERY: Duration = Duration::from_secs(60 * 10);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Poll interval used when no wake-up arrives.
    pub interval: Duration,
    /// How long delivered rows are kept before pruning.
    pub retention: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Moves committed outbox rows to the dispatcher, in commit order.
///
/// Handlers call [`OutboxRelay::wake`] after a mutation commits; the
/// interval poll picks up anything a wake-up missed.
#[derive(Clone)]
pub struct OutboxRelay {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    notify: Arc<Notify>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, config: RelayConfig) -> Self {
        Self {
            db,
            dispatcher,
            notify: Arc::new(Notify::new()),
            config,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Deliver every pending row. Rows with no live subscriber are still
    /// marked delivered. Returns how many rows were processed.
    pub async fn drain(&self) -> Result<usize, EngineError> {
        let mut total = 0;
        loop {
            let db = self.db.clone();
            let batch = blocking(move || db.pending_outbox(BATCH_SIZE)).await?;
            if batch.is_empty() {
                return Ok(total);
            }

            let mut seqs = Vec::with_capacity(batch.len());
            for entry in &batch {
                seqs.push(entry.seq);
                let Some(event) = &entry.event else {
                    warn!("Outbox: dropping undecodable row {}", entry.seq);
                    continue;
                };
                let delivered = self.dispatcher.publish(event).await;
                debug!(
                    seq = entry.seq,
                    user_id = %event.user_id,
                    kind = ?event.kind,
                    delivered,
                    "outbox event relayed"
                );
            }

            let db = self.db.clone();
            let count = seqs.len();
            blocking(move || db.mark_outbox_delivered(&seqs, Utc::now())).await?;
            total += count;

            if count < BATCH_SIZE as usize {
                return Ok(total);
            }
        }
    }

    /// Delete delivered rows older than the retention window.
    pub async fn prune(&self) -> Result<usize, EngineError> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| EngineError::InvalidInput(format!("retention: {e}")))?;
        let db = self.db.clone();
        blocking(move || db.prune_outbox(Utc::now(), retention)).await
    }

    /// Relay loop. Runs until the task is dropped.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval);
        let mut last_prune = tokio::time::Instant::now();
        info!(
            "Outbox relay started (poll every {:?}, retention {:?})",
            self.config.interval, self.config.retention
        );

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = interval.tick() => {}
            }

            if let Err(e) = self.drain().await {
                warn!("Outbox relay error: {}", e);
            }

            if last_prune.elapsed() >= PRUNE_EVERY {
                last_prune = tokio::time::Instant::now();
                match self.prune().await {
                    Ok(0) => {}
                    Ok(count) => info!("Outbox: pruned {} delivered rows", count),
                    Err(e) => warn!("Outbox prune error: {}", e),
                }
            }
        }
    }
}

async fn blocking<F, T>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Unavailable(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stella_types::events::FanoutKind;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Database>, OutboxRelay) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("relay.db")).unwrap());
        let relay = OutboxRelay::new(db.clone(), Dispatcher::new(), RelayConfig::default());
        (dir, db, relay)
    }

    #[tokio::test]
    async fn drains_to_subscribers_in_order_and_once() {
        let (_dir, db, relay) = setup();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let alice = db.create_user("alice", None, 0, now).unwrap().id;
        let bob = db.create_user("bob", None, 0, now).unwrap().id;

        let (_, mut alice_rx) = relay.dispatcher().subscribe(alice).await;
        let req = db.send_friend_request(alice, bob, now).unwrap();
        db.accept_friend_request(req.id, bob, now).unwrap();

        assert_eq!(relay.drain().await.unwrap(), 4);
        let first = alice_rx.recv().await.unwrap();
        let second = alice_rx.recv().await.unwrap();
        assert_eq!(first.kind, FanoutKind::FriendshipChanged);
        assert_eq!(first.payload["change"], "requested");
        assert_eq!(second.payload["change"], "accepted");

        // Nothing is delivered twice.
        assert_eq!(relay.drain().await.unwrap(), 0);
        assert!(alice_rx.try_recv().is_err());
        assert!(db.pending_outbox(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_without_subscribers_are_still_consumed() {
        let (_dir, db, relay) = setup();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let alice = db.create_user("alice", None, 0, now).unwrap().id;
        db.record_post(alice, now.date_naive(), now).unwrap();

        assert_eq!(relay.drain().await.unwrap(), 1);
        assert!(db.pending_outbox(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_row_is_skipped_not_retried() {
        let (_dir, db, relay) = setup();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let alice = db.create_user("alice", None, 0, now).unwrap().id;
        let (_, mut rx) = relay.dispatcher().subscribe(alice).await;

        db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO outbox (user_id, event, created_at) VALUES (?1, 'null', ?2)",
                [alice.to_string(), now.to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();
        db.record_post(alice, now.date_naive(), now).unwrap();

        assert_eq!(relay.drain().await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap().kind, FanoutKind::QuestProgress);
        assert!(db.pending_outbox(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_recent_rows() {
        let (_dir, db, relay) = setup();
        let now = Utc::now();
        let alice = db.create_user("alice", None, 0, now).unwrap().id;
        db.record_post(alice, now.date_naive(), now).unwrap();
        relay.drain().await.unwrap();

        assert_eq!(relay.prune().await.unwrap(), 0);
        let later = now + chrono::Duration::hours(25);
        assert_eq!(db.prune_outbox(later, chrono::Duration::hours(24)).unwrap(), 1);
    }

    #[tokio::test]
    async fn wake_triggers_delivery() {
        let (_dir, db, relay) = setup();
        let now = Utc::now();
        let alice = db.create_user("alice", None, 0, now).unwrap().id;
        let (_, mut rx) = relay.dispatcher().subscribe(alice).await;

        let config = RelayConfig {
            interval: Duration::from_secs(3600),
            ..RelayConfig::default()
        };
        let runner = OutboxRelay::new(db.clone(), relay.dispatcher().clone(), config);
        let waker = runner.clone();
        let task = tokio::spawn(runner.run());

        db.record_post(alice, now.date_naive(), now).unwrap();
        waker.wake();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, FanoutKind::QuestProgress);
        task.abort();
    }
}
