//! Append-only event log. Every mutation appends here inside its own
//! transaction; rows are never updated or deleted.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::models::{Event, EventKind};

use crate::Database;
use crate::error::{EngineError, Result};
use crate::models::{decode_id, decode_ts, encode_ts};

pub const MAX_EVENT_PAGE: u32 = 200;

/// Append one event. Returns its sequence number.
pub fn append(
    conn: &Connection,
    kind: EventKind,
    actor_id: Uuid,
    subject_id: Uuid,
    payload: &serde_json::Value,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (kind, actor_id, subject_id, payload, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            kind.as_str(),
            actor_id.to_string(),
            subject_id.to_string(),
            payload.to_string(),
            encode_ts(at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Events performed by `actor_id`, newest first.
    pub fn list_events(&self, actor_id: Uuid, limit: u32) -> Result<Vec<Event>> {
        let limit = limit.clamp(1, MAX_EVENT_PAGE);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, kind, actor_id, subject_id, payload, occurred_at
                 FROM events
                 WHERE actor_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![actor_id.to_string(), limit], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(seq, kind, actor, subject, payload, occurred_at)| {
                    Ok(Event {
                        seq,
                        kind: kind
                            .parse()
                            .map_err(|e| EngineError::Corrupt(format!("event kind: {e}")))?,
                        actor_id: decode_id(&actor)?,
                        subject_id: decode_id(&subject)?,
                        payload: serde_json::from_str(&payload)?,
                        occurred_at: decode_ts(&occurred_at)?,
                    })
                })
                .collect()
        })
    }
}
