pub mod error;
pub mod events;
pub mod friendships;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod posts;
pub mod quests;
pub mod ratings;
pub mod streaks;
pub mod users;

#[cfg(test)]
mod testutil;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tracing::info;

pub use error::{EngineError, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Upper bound on waiting for a connection or a SQLite lock.
    pub lock_timeout: Duration,
    pub reader_pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            reader_pool_size: 4,
        }
    }
}

/// SQLite store with a reader/writer split: one writer connection through
/// which every mutation runs as an IMMEDIATE transaction, plus a small pool of
/// read-only WAL connections.
pub struct Database {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    lock_timeout: Duration,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &DbConfig::default())
    }

    pub fn open_with(path: &Path, config: &DbConfig) -> Result<Self> {
        let writer = Connection::open(path)
            .map_err(|e| EngineError::Unavailable(format!("{}: {}", path.display(), e)))?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;
        writer.busy_timeout(config.lock_timeout)?;

        migrations::run(&writer)?;

        let pool_size = config.reader_pool_size.max(1);
        let mut readers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| EngineError::Unavailable(format!("{}: {}", path.display(), e)))?;
            conn.busy_timeout(config.lock_timeout)?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            pool_size
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            lock_timeout: config.lock_timeout,
        })
    }

    /// Run a read against one of the pooled read-only connections.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.acquire(&self.readers[idx])?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction on the writer connection.
    /// The transaction commits only if `f` returns `Ok`; any error (or a
    /// panic) drops it, which rolls back every write `f` made.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.acquire(&self.writer)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Lock a connection, giving up after `lock_timeout`.
    fn acquire<'a>(&self, slot: &'a Mutex<Connection>) -> Result<MutexGuard<'a, Connection>> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(e)) => {
                    return Err(EngineError::Unavailable(format!("connection lock poisoned: {e}")));
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(EngineError::Timeout);
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
            }
        }
    }
}
