//! Row types and column codecs. Rows hold raw column values; conversion into
//! `stella-types` models happens in one place so a corrupt value is reported
//! instead of silently defaulted.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use stella_types::models::{Friendship, Post, User};

use crate::error::{EngineError, Result};

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order inside SQL comparisons.
pub fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Corrupt(format!("timestamp '{raw}': {e}")))
}

pub fn encode_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn decode_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| EngineError::Corrupt(format!("date '{raw}': {e}")))
}

pub fn decode_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| EngineError::Corrupt(format!("id '{raw}': {e}")))
}

fn decode_small(raw: i64, column: &str) -> Result<u8> {
    u8::try_from(raw).map_err(|_| EngineError::Corrupt(format!("{column} out of range: {raw}")))
}

pub(crate) fn decode_count(raw: i64, column: &str) -> Result<u32> {
    u32::try_from(raw).map_err(|_| EngineError::Corrupt(format!("{column} out of range: {raw}")))
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub utc_offset_minutes: i32,
    pub created_at: String,
}

impl UserRow {
    pub const COLUMNS: &'static str =
        "u.id, u.username, u.avatar_ref, u.utc_offset_minutes, u.created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Self::from_row_at(row, 0)
    }

    pub fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            username: row.get(offset + 1)?,
            avatar_ref: row.get(offset + 2)?,
            utc_offset_minutes: row.get(offset + 3)?,
            created_at: row.get(offset + 4)?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = EngineError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: decode_id(&row.id)?,
            username: row.username,
            avatar_ref: row.avatar_ref,
            utc_offset_minutes: row.utc_offset_minutes,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub body: Option<String>,
    pub image_ref: Option<String>,
    pub self_rating: i64,
    pub kind: String,
    pub created_at: String,
}

impl PostRow {
    pub const COLUMNS: &'static str =
        "p.id, p.author_id, p.body, p.image_ref, p.self_rating, p.kind, p.created_at";

    /// Reads the seven `COLUMNS` starting at `offset`.
    pub fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            author_id: row.get(offset + 1)?,
            body: row.get(offset + 2)?,
            image_ref: row.get(offset + 3)?,
            self_rating: row.get(offset + 4)?,
            kind: row.get(offset + 5)?,
            created_at: row.get(offset + 6)?,
        })
    }
}

impl TryFrom<PostRow> for Post {
    type Error = EngineError;

    fn try_from(row: PostRow) -> Result<Self> {
        Ok(Post {
            id: decode_id(&row.id)?,
            author_id: decode_id(&row.author_id)?,
            text: row.body,
            image_ref: row.image_ref,
            self_rating: decode_small(row.self_rating, "self_rating")?,
            kind: row
                .kind
                .parse()
                .map_err(|e| EngineError::Corrupt(format!("post kind: {e}")))?,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

pub struct FriendshipRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
}

impl FriendshipRow {
    pub const COLUMNS: &'static str = "f.id, f.sender_id, f.receiver_id, f.status, f.created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            receiver_id: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub const WIDTH: usize = 5;
}

impl TryFrom<FriendshipRow> for Friendship {
    type Error = EngineError;

    fn try_from(row: FriendshipRow) -> Result<Self> {
        Ok(Friendship {
            id: decode_id(&row.id)?,
            sender_id: decode_id(&row.sender_id)?,
            receiver_id: decode_id(&row.receiver_id)?,
            status: row
                .status
                .parse()
                .map_err(|e| EngineError::Corrupt(format!("friendship status: {e}")))?,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

/// Post joined with its author, rating summary and the viewer's own vote.
pub struct FeedRow {
    pub post: PostRow,
    pub author_username: String,
    pub author_avatar_ref: Option<String>,
    pub vote_count: i64,
    pub star_total: i64,
    pub viewer_stars: Option<i64>,
}

impl FeedRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            post: PostRow::from_row_at(row, 0)?,
            author_username: row.get(7)?,
            author_avatar_ref: row.get(8)?,
            vote_count: row.get(9)?,
            star_total: row.get(10)?,
            viewer_stars: row.get(11)?,
        })
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
