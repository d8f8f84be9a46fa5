use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::error;

use stella_db::{Database, EngineError};
use stella_gateway::dispatcher::Dispatcher;
use stella_gateway::relay::OutboxRelay;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub relay: OutboxRelay,
    /// Upper bound on one blocking store call.
    pub request_timeout: Duration,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, relay: OutboxRelay, request_timeout: Duration) -> AppState {
        Arc::new(Self {
            db,
            relay,
            request_timeout,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.relay.dispatcher()
    }

    /// Ingress time for a request; resolved once and threaded through.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Run a store call on the blocking pool, bounded by `request_timeout`.
    pub async fn read<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));
        match tokio::time::timeout(self.request_timeout, task).await {
            Err(_) => Err(ApiError::Timeout),
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                Err(ApiError::Internal(e.to_string()))
            }
            Ok(Ok(result)) => result.map_err(ApiError::from),
        }
    }

    /// Like [`read`](Self::read), then wakes the outbox relay so fan-out
    /// for the committed change goes out promptly.
    pub async fn write<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let out = self.read(f).await?;
        self.relay.wake();
        Ok(out)
    }
}
