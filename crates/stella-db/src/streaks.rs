//! Streak engine. Driven only by a day's quest flipping to completed.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::events::FanoutEvent;
use stella_types::models::Streak;

use crate::Database;
use crate::error::Result;
use crate::models::{OptionalExt, decode_count, decode_date, encode_date, encode_ts};
use crate::{outbox, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    /// First completion ever.
    Started,
    /// Completed the day after the last completed day.
    Continued,
    /// Same day seen again; nothing changes.
    Duplicate,
    /// Gap of two or more days, or an out-of-order date.
    Reset,
}

/// Apply one completed day to a streak. Never touches storage.
pub fn advance(streak: &Streak, date: NaiveDate) -> (Streak, StreakTransition) {
    let (current, transition) = match streak.last_completed_date {
        None => (1, StreakTransition::Started),
        Some(last) if last == date => return (streak.clone(), StreakTransition::Duplicate),
        Some(last) if last.succ_opt() == Some(date) => {
            (streak.current_streak.saturating_add(1), StreakTransition::Continued)
        }
        Some(_) => (1, StreakTransition::Reset),
    };

    let next = Streak {
        user_id: streak.user_id,
        current_streak: current,
        longest_streak: streak.longest_streak.max(current),
        last_completed_date: Some(date),
    };
    (next, transition)
}

pub(crate) fn load(conn: &Connection, user_id: Uuid) -> Result<Streak> {
    let row = conn
        .query_row(
            "SELECT current_streak, longest_streak, last_completed_date
             FROM streaks WHERE user_id = ?1",
            [user_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(Streak::empty(user_id)),
        Some((current, longest, last)) => Ok(Streak {
            user_id,
            current_streak: decode_count(current, "current_streak")?,
            longest_streak: decode_count(longest, "longest_streak")?,
            last_completed_date: last.as_deref().map(decode_date).transpose()?,
        }),
    }
}

/// Consume a `quest-completed(user, date)` signal inside the caller's
/// transaction. Returns the new streak when it changed.
pub(crate) fn record_completion(
    conn: &Connection,
    user_id: Uuid,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<Streak>> {
    let before = load(conn, user_id)?;
    let (after, transition) = advance(&before, date);
    if transition == StreakTransition::Duplicate {
        tracing::debug!(%user_id, %date, "duplicate completion ignored");
        return Ok(None);
    }

    conn.execute(
        "INSERT INTO streaks (user_id, current_streak, longest_streak, last_completed_date, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            current_streak = excluded.current_streak,
            longest_streak = excluded.longest_streak,
            last_completed_date = excluded.last_completed_date,
            updated_at = excluded.updated_at",
        rusqlite::params![
            user_id.to_string(),
            after.current_streak,
            after.longest_streak,
            after.last_completed_date.map(encode_date),
            encode_ts(now),
        ],
    )?;
    outbox::enqueue(conn, &FanoutEvent::streak_changed(&after), now)?;

    tracing::debug!(
        %user_id,
        %date,
        ?transition,
        current = after.current_streak,
        longest = after.longest_streak,
        "streak updated"
    );
    Ok(Some(after))
}

impl Database {
    /// Point-in-time snapshot. A skipped day is only noticed on the next
    /// completion, so this may show a streak that has already lapsed.
    pub fn get_streak(&self, user_id: Uuid) -> Result<Streak> {
        self.with_conn(|conn| {
            users::require_user(conn, user_id)?;
            load(conn, user_id)
        })
    }
}
