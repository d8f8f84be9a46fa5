//! Vote ledger with an incrementally maintained average per post.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::models::{EventKind, Rating, Vote};

use crate::Database;
use crate::error::{EngineError, Result};
use crate::models::{OptionalExt, decode_count, decode_ts, encode_ts};
use crate::posts;
use crate::quests::{self, QuestOutcome};
use crate::{events, users};

#[derive(Debug, Clone)]
pub struct VoteOutcome {
    /// Post rating after this vote.
    pub rating: Rating,
    /// Stars this voter had given before, if this was a change.
    pub previous_stars: Option<u8>,
    /// Present only for a first vote; a changed vote is not counted again.
    pub quest: Option<QuestOutcome>,
}

impl VoteOutcome {
    pub fn average(&self) -> f64 {
        self.rating.average()
    }
}

fn load_rating(conn: &Connection, post_id: Uuid) -> Result<Rating> {
    let row = conn
        .query_row(
            "SELECT vote_count, star_total FROM post_ratings WHERE post_id = ?1",
            [post_id.to_string()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    match row {
        None => Ok(Rating::EMPTY),
        Some((count, total)) => Ok(Rating {
            vote_count: decode_count(count, "vote_count")?,
            star_total: decode_count(total, "star_total")?,
        }),
    }
}

impl Database {
    /// Cast or change `voter_id`'s vote on a post and return the new rating.
    ///
    /// Only the first vote counts toward the voter's daily quest, on the
    /// voter's local date at `now`.
    pub fn cast_vote(&self, voter_id: Uuid, post_id: Uuid, stars: i64, now: DateTime<Utc>) -> Result<VoteOutcome> {
        if !(1..=5).contains(&stars) {
            return Err(EngineError::InvalidInput("stars must be 1-5".into()));
        }
        let stars = stars as u8;

        self.with_tx(|tx| {
            let post = posts::require_visible_post(tx, post_id, now)?;
            if post.author_id == voter_id {
                return Err(EngineError::SelfVoteForbidden);
            }
            let voter = users::require_user(tx, voter_id)?;

            let prior: Option<u8> = tx
                .query_row(
                    "SELECT stars FROM votes WHERE post_id = ?1 AND voter_id = ?2",
                    rusqlite::params![post_id.to_string(), voter_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let quest = match prior {
                None => {
                    tx.execute(
                        "INSERT INTO votes (post_id, voter_id, stars, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        rusqlite::params![
                            post_id.to_string(),
                            voter_id.to_string(),
                            stars,
                            encode_ts(now),
                        ],
                    )?;
                    tx.execute(
                        "INSERT INTO post_ratings (post_id, vote_count, star_total) VALUES (?1, 1, ?2)
                         ON CONFLICT(post_id) DO UPDATE SET
                            vote_count = vote_count + 1,
                            star_total = star_total + excluded.star_total",
                        rusqlite::params![post_id.to_string(), stars],
                    )?;
                    events::append(
                        tx,
                        EventKind::VoteCast,
                        voter_id,
                        post_id,
                        &serde_json::json!({ "stars": stars }),
                        now,
                    )?;
                    Some(quests::record_vote_cast(tx, voter_id, voter.local_date(now), now)?)
                }
                Some(old) => {
                    tx.execute(
                        "UPDATE votes SET stars = ?3, updated_at = ?4
                         WHERE post_id = ?1 AND voter_id = ?2",
                        rusqlite::params![
                            post_id.to_string(),
                            voter_id.to_string(),
                            stars,
                            encode_ts(now),
                        ],
                    )?;
                    tx.execute(
                        "UPDATE post_ratings SET star_total = star_total + ?2 WHERE post_id = ?1",
                        rusqlite::params![post_id.to_string(), i64::from(stars) - i64::from(old)],
                    )?;
                    if old != stars {
                        events::append(
                            tx,
                            EventKind::VoteChanged,
                            voter_id,
                            post_id,
                            &serde_json::json!({ "from": old, "to": stars }),
                            now,
                        )?;
                    }
                    None
                }
            };

            let rating = load_rating(tx, post_id)?;
            tracing::debug!(
                %post_id,
                %voter_id,
                stars,
                changed = prior.is_some(),
                average = rating.average(),
                "vote recorded"
            );
            Ok(VoteOutcome {
                rating,
                previous_stars: prior,
                quest,
            })
        })
    }

    /// Current rating of a visible post.
    pub fn get_rating(&self, post_id: Uuid, now: DateTime<Utc>) -> Result<Rating> {
        self.with_conn(|conn| {
            posts::require_visible_post(conn, post_id, now)?;
            load_rating(conn, post_id)
        })
    }

    /// Mean of the live votes on a visible post, 0 when there are none.
    pub fn get_average(&self, post_id: Uuid, now: DateTime<Utc>) -> Result<f64> {
        self.get_rating(post_id, now).map(|r| r.average())
    }

    /// Recompute a post's rating from the ledger itself, bypassing the
    /// summary row.
    pub fn verify_rating(&self, post_id: Uuid) -> Result<Rating> {
        self.with_conn(|conn| {
            let (count, total): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(stars), 0) FROM votes WHERE post_id = ?1",
                [post_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(Rating {
                vote_count: decode_count(count, "vote_count")?,
                star_total: decode_count(total, "star_total")?,
            })
        })
    }

    pub fn get_vote(&self, post_id: Uuid, voter_id: Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT stars, created_at, updated_at FROM votes
                     WHERE post_id = ?1 AND voter_id = ?2",
                    rusqlite::params![post_id.to_string(), voter_id.to_string()],
                    |row| {
                        Ok((
                            row.get::<_, u8>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(stars, created_at, updated_at)| {
                Ok(Vote {
                    post_id,
                    voter_id,
                    stars,
                    created_at: decode_ts(&created_at)?,
                    updated_at: decode_ts(&updated_at)?,
                })
            })
            .transpose()
        })
    }
}
