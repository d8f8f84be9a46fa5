//! Daily quest tracker: per (user, local date) counters and a completion
//! flag that flips exactly once.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::events::FanoutEvent;
use stella_types::models::{
    DailyProgress, EventKind, QUEST_REQUIRED_POSTS, QUEST_REQUIRED_VOTES, Streak,
};

use crate::Database;
use crate::error::Result;
use crate::models::{OptionalExt, decode_count, decode_date, encode_date, encode_ts};
use crate::{events, outbox, streaks, users};

#[derive(Debug, Clone, Copy)]
enum Counter {
    Posts,
    Votes,
}

/// Result of one counted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestOutcome {
    pub progress: DailyProgress,
    /// True only for the action that flipped `completed`.
    pub completed_now: bool,
    /// New streak when the completion changed it.
    pub streak: Option<Streak>,
}

pub(crate) fn load(conn: &Connection, user_id: Uuid, date: NaiveDate) -> Result<DailyProgress> {
    let row = conn
        .query_row(
            "SELECT post_count, vote_count, completed FROM daily_progress
             WHERE user_id = ?1 AND date = ?2",
            rusqlite::params![user_id.to_string(), encode_date(date)],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, bool>(2)?)),
        )
        .optional()?;

    match row {
        None => Ok(DailyProgress::empty(user_id, date)),
        Some((posts, votes, completed)) => Ok(DailyProgress {
            user_id,
            date,
            post_count: decode_count(posts, "post_count")?,
            vote_count: decode_count(votes, "vote_count")?,
            completed,
        }),
    }
}

/// Count a post made on `date` (the author's local date when it was created).
pub(crate) fn record_post(
    conn: &Connection,
    user_id: Uuid,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<QuestOutcome> {
    record(conn, user_id, date, Counter::Posts, now)
}

/// Count a first vote on a post. Changed votes must not come through here.
pub(crate) fn record_vote_cast(
    conn: &Connection,
    user_id: Uuid,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<QuestOutcome> {
    record(conn, user_id, date, Counter::Votes, now)
}

fn record(
    conn: &Connection,
    user_id: Uuid,
    date: NaiveDate,
    counter: Counter,
    now: DateTime<Utc>,
) -> Result<QuestOutcome> {
    let sql = match counter {
        Counter::Posts => {
            "INSERT INTO daily_progress (user_id, date, post_count, vote_count)
             VALUES (?1, ?2, 1, 0)
             ON CONFLICT(user_id, date) DO UPDATE SET post_count = post_count + 1"
        }
        Counter::Votes => {
            "INSERT INTO daily_progress (user_id, date, post_count, vote_count)
             VALUES (?1, ?2, 0, 1)
             ON CONFLICT(user_id, date) DO UPDATE SET vote_count = vote_count + 1"
        }
    };
    let day = encode_date(date);
    conn.execute(sql, rusqlite::params![user_id.to_string(), day])?;

    // The guarded flip is the single emission point for quest-completed:
    // only the statement that changes 0 -> 1 sees a row count of 1.
    let flipped = conn.execute(
        "UPDATE daily_progress SET completed = 1, completed_at = ?3
         WHERE user_id = ?1 AND date = ?2 AND completed = 0
           AND post_count >= ?4 AND vote_count >= ?5",
        rusqlite::params![
            user_id.to_string(),
            day,
            encode_ts(now),
            QUEST_REQUIRED_POSTS,
            QUEST_REQUIRED_VOTES,
        ],
    )? == 1;

    let progress = load(conn, user_id, date)?;
    outbox::enqueue(conn, &FanoutEvent::quest_progress(&progress), now)?;

    let streak = if flipped {
        events::append(
            conn,
            EventKind::QuestCompleted,
            user_id,
            user_id,
            &serde_json::json!({ "date": day }),
            now,
        )?;
        tracing::info!(%user_id, %date, "daily quest completed");
        streaks::record_completion(conn, user_id, date, now)?
    } else {
        None
    };

    Ok(QuestOutcome {
        progress,
        completed_now: flipped,
        streak,
    })
}

impl Database {
    /// Progress for `date`; a day with no activity reads as all zeros.
    pub fn get_daily_progress(&self, user_id: Uuid, date: NaiveDate) -> Result<DailyProgress> {
        self.with_conn(|conn| {
            users::require_user(conn, user_id)?;
            load(conn, user_id, date)
        })
    }

    /// Count a post for `date` in its own transaction.
    pub fn record_post(&self, user_id: Uuid, date: NaiveDate, now: DateTime<Utc>) -> Result<QuestOutcome> {
        self.with_tx(|tx| {
            users::require_user(tx, user_id)?;
            record_post(tx, user_id, date, now)
        })
    }

    /// Count a genuinely new vote for `date` in its own transaction.
    pub fn record_vote_cast(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<QuestOutcome> {
        self.with_tx(|tx| {
            users::require_user(tx, user_id)?;
            record_vote_cast(tx, user_id, date, now)
        })
    }

    /// Every date on which `user_id` completed the quest, oldest first.
    pub fn completed_dates(&self, user_id: Uuid) -> Result<Vec<NaiveDate>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT date FROM daily_progress
                 WHERE user_id = ?1 AND completed = 1
                 ORDER BY date",
            )?;
            let raw = stmt
                .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raw.iter().map(|d| decode_date(d)).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testutil::{fresh_db, march, noon, user};
    use std::sync::Arc;

    #[test]
    fn one_post_and_three_votes_complete_the_day() {
        let (_dir, db) = fresh_db();
        let u = user(&db, "quester");

        let first = db.record_post(u, march(2), noon(2)).unwrap();
        assert!(!first.completed_now);
        db.record_vote_cast(u, march(2), noon(2)).unwrap();
        db.record_vote_cast(u, march(2), noon(2)).unwrap();
        let third = db.record_vote_cast(u, march(2), noon(2)).unwrap();

        assert!(third.completed_now);
        assert_eq!(
            third.progress,
            DailyProgress { user_id: u, date: march(2), post_count: 1, vote_count: 3, completed: true }
        );
        let streak = third.streak.unwrap();
        assert_eq!((streak.current_streak, streak.longest_streak), (1, 1));
    }

    #[test]
    fn completion_is_emitted_once() {
        let (_dir, db) = fresh_db();
        let u = user(&db, "steady");
        db.record_post(u, march(2), noon(2)).unwrap();
        for _ in 0..3 {
            db.record_vote_cast(u, march(2), noon(2)).unwrap();
        }

        let later = db.record_vote_cast(u, march(2), noon(2)).unwrap();
        assert!(!later.completed_now);
        assert!(later.progress.completed);
        let again = db.record_post(u, march(2), noon(2)).unwrap();
        assert!(!again.completed_now);

        let completions = db
            .list_events(u, 50)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EventKind::QuestCompleted)
            .count();
        assert_eq!(completions, 1);
        assert_eq!(db.get_streak(u).unwrap().current_streak, 1);
    }

    #[test]
    fn racing_increments_flip_exactly_once() {
        let (_dir, db) = fresh_db();
        let db = Arc::new(db);
        let u = user(&db, "racer");
        db.record_post(u, march(2), noon(2)).unwrap();
        db.record_vote_cast(u, march(2), noon(2)).unwrap();
        db.record_vote_cast(u, march(2), noon(2)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || db.record_vote_cast(u, march(2), noon(2)).unwrap())
            })
            .collect();
        let flips = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| o.completed_now)
            .count();

        assert_eq!(flips, 1);
        let progress = db.get_daily_progress(u, march(2)).unwrap();
        assert_eq!(progress.vote_count, 10);
        assert!(progress.completed);
    }

    #[test]
    fn days_are_tracked_separately() {
        let (_dir, db) = fresh_db();
        let u = user(&db, "split");
        db.record_post(u, march(2), noon(2)).unwrap();
        db.record_vote_cast(u, march(3), noon(3)).unwrap();

        let d2 = db.get_daily_progress(u, march(2)).unwrap();
        let d3 = db.get_daily_progress(u, march(3)).unwrap();
        assert_eq!((d2.post_count, d2.vote_count), (1, 0));
        assert_eq!((d3.post_count, d3.vote_count), (0, 1));
        assert_eq!(db.get_daily_progress(u, march(9)).unwrap(), DailyProgress::empty(u, march(9)));
    }

    #[test]
    fn streak_follows_completed_days() {
        let (_dir, db) = fresh_db();
        let u = user(&db, "daily");
        let complete = |day: u32| {
            db.record_post(u, march(day), noon(day)).unwrap();
            for _ in 0..3 {
                db.record_vote_cast(u, march(day), noon(day)).unwrap();
            }
        };

        complete(2);
        complete(3);
        complete(4);
        assert_eq!(db.get_streak(u).unwrap().current_streak, 3);

        complete(6);
        let streak = db.get_streak(u).unwrap();
        assert_eq!((streak.current_streak, streak.longest_streak), (1, 3));
        assert_eq!(streak.last_completed_date, Some(march(6)));
        assert_eq!(db.completed_dates(u).unwrap(), vec![march(2), march(3), march(4), march(6)]);
    }

    #[test]
    fn unknown_user_cannot_record() {
        let (_dir, db) = fresh_db();
        let err = db.record_post(Uuid::new_v4(), march(2), noon(2)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
