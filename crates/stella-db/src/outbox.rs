//! Transactional outbox for fan-out deltas. Mutations enqueue inside their
//! transaction; the gateway relay drains after commit.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::warn;

use stella_types::events::FanoutEvent;

use crate::Database;
use crate::error::Result;
use crate::models::encode_ts;

/// An undelivered outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub seq: i64,
    /// `None` when the stored payload no longer decodes. The row still has
    /// to be consumed or it would block every row behind it.
    pub event: Option<FanoutEvent>,
}

pub fn enqueue(conn: &Connection, event: &FanoutEvent, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO outbox (user_id, event, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            event.user_id.to_string(),
            serde_json::to_string(event)?,
            encode_ts(at),
        ],
    )?;
    Ok(())
}

pub fn enqueue_all(conn: &Connection, events: &[FanoutEvent], at: DateTime<Utc>) -> Result<()> {
    for event in events {
        enqueue(conn, event, at)?;
    }
    Ok(())
}

impl Database {
    /// Oldest undelivered entries, in commit order.
    pub fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, event FROM outbox
                 WHERE delivered_at IS NULL
                 ORDER BY seq
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .map(|(seq, raw)| {
                    let event = match serde_json::from_str(&raw) {
                        Ok(event) => Some(event),
                        Err(e) => {
                            warn!(seq, "undecodable outbox row: {}", e);
                            None
                        }
                    };
                    OutboxEntry { seq, event }
                })
                .collect())
        })
    }

    pub fn mark_outbox_delivered(&self, seqs: &[i64], at: DateTime<Utc>) -> Result<()> {
        if seqs.is_empty() {
            return Ok(());
        }
        let stamp = encode_ts(at);
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "UPDATE outbox SET delivered_at = ?1 WHERE seq = ?2 AND delivered_at IS NULL",
            )?;
            for seq in seqs {
                stmt.execute(rusqlite::params![stamp, seq])?;
            }
            Ok(())
        })
    }

    /// Delete delivered rows older than `retention`. Returns how many went.
    pub fn prune_outbox(&self, now: DateTime<Utc>, retention: Duration) -> Result<usize> {
        let cutoff = encode_ts(now - retention);
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM outbox WHERE delivered_at IS NOT NULL AND delivered_at < ?1",
                [cutoff],
            )?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::{fresh_db, march, noon, user};

    #[test]
    fn undecodable_rows_do_not_block_the_queue() {
        let (_dir, db) = fresh_db();
        let alice = user(&db, "alice");
        db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO outbox (user_id, event, created_at) VALUES (?1, '{broken', ?2)",
                [alice.to_string(), super::encode_ts(noon(2))],
            )?;
            Ok(())
        })
        .unwrap();
        db.record_post(alice, march(2), noon(2)).unwrap();

        let pending = db.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].event.is_none());
        assert!(pending[1].event.is_some());

        let seqs: Vec<i64> = pending.iter().map(|e| e.seq).collect();
        db.mark_outbox_delivered(&seqs, noon(2)).unwrap();
        assert!(db.pending_outbox(10).unwrap().is_empty());
    }
}
