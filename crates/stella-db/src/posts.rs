use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::models::{
    EventKind, FeedFilter, MAX_POST_TEXT_CHARS, Post, PostKind, Rating, STORY_TTL_HOURS,
};

use crate::Database;
use crate::error::{EngineError, Result};
use crate::models::{FeedRow, OptionalExt, PostRow, decode_count, encode_ts};
use crate::quests::{self, QuestOutcome};
use crate::{events, users};

pub const MAX_FEED_PAGE: u32 = 50;

#[derive(Debug, Clone)]
pub struct PostCreated {
    pub post: Post,
    pub quest: QuestOutcome,
}

/// A visible post with everything a feed card shows.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub post: Post,
    pub author_username: String,
    pub author_avatar_ref: Option<String>,
    pub rating: Rating,
    pub viewer_vote: Option<u8>,
}

impl TryFrom<FeedRow> for FeedItem {
    type Error = EngineError;

    fn try_from(row: FeedRow) -> Result<Self> {
        let viewer_vote = row
            .viewer_stars
            .map(|s| u8::try_from(s).map_err(|_| EngineError::Corrupt(format!("stars out of range: {s}"))))
            .transpose()?;
        Ok(FeedItem {
            post: Post::try_from(row.post)?,
            author_username: row.author_username,
            author_avatar_ref: row.author_avatar_ref,
            rating: Rating {
                vote_count: decode_count(row.vote_count, "vote_count")?,
                star_total: decode_count(row.star_total, "star_total")?,
            },
            viewer_vote,
        })
    }
}

/// Blank strings count as absent.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn find_post(conn: &Connection, id: Uuid) -> Result<Option<Post>> {
    let sql = format!("SELECT {} FROM posts p WHERE p.id = ?1", PostRow::COLUMNS);
    conn.query_row(&sql, [id.to_string()], |row| PostRow::from_row_at(row, 0))
        .optional()?
        .map(Post::try_from)
        .transpose()
}

/// The post if it exists and is still visible at `now`.
pub(crate) fn require_visible_post(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<Post> {
    find_post(conn, id)?
        .filter(|p| p.is_visible(now))
        .ok_or_else(|| EngineError::NotFound(format!("post {id}")))
}

const FEED_SELECT: &str = "
    SELECT p.id, p.author_id, p.body, p.image_ref, p.self_rating, p.kind, p.created_at,
           u.username, u.avatar_ref,
           COALESCE(r.vote_count, 0), COALESCE(r.star_total, 0),
           v.stars
    FROM posts p
    JOIN users u ON u.id = p.author_id
    LEFT JOIN post_ratings r ON r.post_id = p.id
    LEFT JOIN votes v ON v.post_id = p.id AND v.voter_id = ?1";

impl Database {
    /// Publish a post and count it toward the author's quest for the local
    /// date of `now`.
    pub fn create_post(
        &self,
        author_id: Uuid,
        text: Option<&str>,
        image_ref: Option<&str>,
        self_rating: i64,
        kind: PostKind,
        now: DateTime<Utc>,
    ) -> Result<PostCreated> {
        if !(1..=5).contains(&self_rating) {
            return Err(EngineError::InvalidInput("self rating must be 1-5".into()));
        }
        let text = non_blank(text);
        let image_ref = non_blank(image_ref);
        if text.is_none() && image_ref.is_none() {
            return Err(EngineError::InvalidInput("post needs text or an image".into()));
        }
        if text.is_some_and(|t| t.chars().count() > MAX_POST_TEXT_CHARS) {
            return Err(EngineError::InvalidInput(format!(
                "text is limited to {MAX_POST_TEXT_CHARS} characters"
            )));
        }

        let post = Post {
            id: Uuid::new_v4(),
            author_id,
            text: text.map(str::to_string),
            image_ref: image_ref.map(str::to_string),
            self_rating: self_rating as u8,
            kind,
            created_at: now,
        };

        let quest = self.with_tx(|tx| {
            let author = users::require_user(tx, author_id)?;

            tx.execute(
                "INSERT INTO posts (id, author_id, body, image_ref, self_rating, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    post.id.to_string(),
                    author_id.to_string(),
                    post.text,
                    post.image_ref,
                    post.self_rating,
                    kind.as_str(),
                    encode_ts(now),
                ],
            )?;
            tx.execute(
                "INSERT INTO post_ratings (post_id, vote_count, star_total) VALUES (?1, 0, 0)",
                [post.id.to_string()],
            )?;
            events::append(
                tx,
                EventKind::PostCreated,
                author_id,
                post.id,
                &serde_json::json!({ "kind": kind, "selfRating": post.self_rating }),
                now,
            )?;

            quests::record_post(tx, author_id, author.local_date(now), now)
        })?;

        tracing::debug!(post_id = %post.id, %author_id, kind = kind.as_str(), "post created");
        Ok(PostCreated { post, quest })
    }

    /// Author-only delete. Votes and the rating summary go with the post;
    /// quest counters already granted are left alone.
    pub fn delete_post(&self, post_id: Uuid, acting_user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.with_tx(|tx| {
            let post = find_post(tx, post_id)?
                .ok_or_else(|| EngineError::NotFound(format!("post {post_id}")))?;
            if post.author_id != acting_user_id {
                return Err(EngineError::Forbidden("only the author can delete a post".into()));
            }

            let votes_removed: i64 = tx.query_row(
                "SELECT COUNT(*) FROM votes WHERE post_id = ?1",
                [post_id.to_string()],
                |row| row.get(0),
            )?;
            tx.execute("DELETE FROM posts WHERE id = ?1", [post_id.to_string()])?;
            events::append(
                tx,
                EventKind::PostDeleted,
                acting_user_id,
                post_id,
                &serde_json::json!({ "votesRemoved": votes_removed }),
                now,
            )?;

            tracing::debug!(%post_id, votes_removed, "post deleted");
            Ok(())
        })
    }

    /// A single post as the feed would show it, or `NotFound` once gone or
    /// expired.
    pub fn get_post(&self, post_id: Uuid, viewer_id: Option<Uuid>, now: DateTime<Utc>) -> Result<FeedItem> {
        self.with_conn(|conn| {
            let sql = format!("{FEED_SELECT} WHERE p.id = ?2");
            let viewer = viewer_id.map(|v| v.to_string());
            let item = conn
                .query_row(&sql, rusqlite::params![viewer, post_id.to_string()], FeedRow::from_row)
                .optional()?
                .map(FeedItem::try_from)
                .transpose()?;
            item.filter(|i| i.post.is_visible(now))
                .ok_or_else(|| EngineError::NotFound(format!("post {post_id}")))
        })
    }

    /// Newest visible posts. Stories only come from the viewer and the
    /// viewer's accepted friends.
    pub fn feed(
        &self,
        viewer_id: Uuid,
        filter: FeedFilter,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<FeedItem>> {
        let kind = match filter {
            FeedFilter::All => None,
            FeedFilter::Global => Some(PostKind::Global.as_str()),
            FeedFilter::Story => Some(PostKind::Story.as_str()),
        };
        let story_cutoff = encode_ts(now - Duration::hours(STORY_TTL_HOURS));
        let limit = limit.clamp(1, MAX_FEED_PAGE);

        self.with_conn(|conn| {
            users::require_user(conn, viewer_id)?;

            let sql = format!(
                "{FEED_SELECT}
                 WHERE (?2 IS NULL OR p.kind = ?2)
                   AND (p.kind = 'global'
                        OR (p.created_at > ?3
                            AND (p.author_id = ?1
                                 OR EXISTS (SELECT 1 FROM friendships f
                                            WHERE f.status = 'accepted'
                                              AND f.pair_lo = MIN(?1, p.author_id)
                                              AND f.pair_hi = MAX(?1, p.author_id)))))
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer_id.to_string(), kind, story_cutoff, limit],
                    FeedRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(FeedItem::try_from).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fresh_db, global_post, march, noon, user};

    #[test]
    fn validates_content() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "author");
        let cases: [(Option<&str>, Option<&str>, i64); 4] = [
            (Some("hi"), None, 0),
            (Some("hi"), None, 6),
            (Some("   "), None, 3),
            (None, Some(""), 3),
        ];
        for (text, image, rating) in cases {
            let err = db
                .create_post(a, text, image, rating, PostKind::Global, noon(2))
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)));
        }

        let long = "é".repeat(MAX_POST_TEXT_CHARS + 1);
        let err = db
            .create_post(a, Some(&long), None, 3, PostKind::Global, noon(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let exact = "é".repeat(MAX_POST_TEXT_CHARS);
        db.create_post(a, Some(&exact), None, 3, PostKind::Global, noon(2)).unwrap();
        db.create_post(a, None, Some("img/1.png"), 5, PostKind::Story, noon(2)).unwrap();
    }

    #[test]
    fn unknown_author_is_not_found() {
        let (_dir, db) = fresh_db();
        let err = db
            .create_post(Uuid::new_v4(), Some("x"), None, 3, PostKind::Global, noon(2))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn post_counts_toward_authors_local_day() {
        let (_dir, db) = fresh_db();
        let late = db.create_user("night_owl", None, 120, noon(1)).unwrap();
        // 23:00 UTC is already the next day at UTC+2.
        let at = noon(2) + Duration::hours(11);
        let created = db
            .create_post(late.id, Some("late"), None, 2, PostKind::Global, at)
            .unwrap();
        assert_eq!(created.quest.progress.date, march(3));
        assert_eq!(created.quest.progress.post_count, 1);
        assert_eq!(db.get_daily_progress(late.id, march(2)).unwrap().post_count, 0);
    }

    #[test]
    fn only_the_author_deletes() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "owner");
        let b = user(&db, "stranger");
        let p = global_post(&db, a, noon(2));

        let err = db.delete_post(p, b, noon(2)).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        db.delete_post(p, a, noon(2)).unwrap();
        assert!(matches!(db.delete_post(p, a, noon(2)), Err(EngineError::NotFound(_))));
        assert!(matches!(db.get_post(p, None, noon(2)), Err(EngineError::NotFound(_))));

        let kinds: Vec<_> = db.list_events(a, 10).unwrap().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::PostDeleted, EventKind::PostCreated]);
    }

    #[test]
    fn deleting_keeps_quest_progress() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "keeper");
        let p = global_post(&db, a, noon(2));
        db.delete_post(p, a, noon(2)).unwrap();
        assert_eq!(db.get_daily_progress(a, march(2)).unwrap().post_count, 1);
        assert_eq!(db.user_stats(a).unwrap().post_count, 0);
    }

    #[test]
    fn stories_expire_after_a_day() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "storyteller");
        let story = db
            .create_post(a, Some("brief"), None, 4, PostKind::Story, noon(2))
            .unwrap()
            .post
            .id;

        let just_before = noon(3) - Duration::seconds(1);
        assert!(db.get_post(story, None, just_before).is_ok());
        assert!(matches!(db.get_post(story, None, noon(3)), Err(EngineError::NotFound(_))));
        assert!(db.feed(a, FeedFilter::Story, noon(3), 50).unwrap().is_empty());
    }

    #[test]
    fn stories_are_for_friends_only() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "poster");
        let friend = user(&db, "friend");
        let stranger = user(&db, "stranger");
        let req = db.send_friend_request(a, friend, noon(1)).unwrap();
        db.accept_friend_request(req.id, friend, noon(1)).unwrap();

        db.create_post(a, Some("story"), None, 4, PostKind::Story, noon(2)).unwrap();
        global_post(&db, a, noon(2) + Duration::minutes(1));

        assert_eq!(db.feed(a, FeedFilter::All, noon(2) + Duration::hours(1), 50).unwrap().len(), 2);
        assert_eq!(db.feed(friend, FeedFilter::All, noon(2) + Duration::hours(1), 50).unwrap().len(), 2);
        let seen = db.feed(stranger, FeedFilter::All, noon(2) + Duration::hours(1), 50).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].post.kind, PostKind::Global);
    }

    #[test]
    fn feed_is_newest_first_and_filtered() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "writer");
        let first = global_post(&db, a, noon(2));
        let second = global_post(&db, a, noon(2) + Duration::minutes(5));
        db.create_post(a, Some("s"), None, 1, PostKind::Story, noon(2) + Duration::minutes(9))
            .unwrap();

        let now = noon(2) + Duration::hours(1);
        let globals: Vec<_> = db
            .feed(a, FeedFilter::Global, now, 50)
            .unwrap()
            .into_iter()
            .map(|i| i.post.id)
            .collect();
        assert_eq!(globals, vec![second, first]);
        assert_eq!(db.feed(a, FeedFilter::Story, now, 50).unwrap().len(), 1);
        assert_eq!(db.feed(a, FeedFilter::All, now, 2).unwrap().len(), 2);
    }
}
