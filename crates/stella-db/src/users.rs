use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::models::{MAX_UTC_OFFSET_MINUTES, MIN_UTC_OFFSET_MINUTES, User};

use crate::Database;
use crate::error::{EngineError, Result};
use crate::models::{OptionalExt, UserRow, encode_ts};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    pub post_count: u64,
    pub vote_count: u64,
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(EngineError::InvalidInput(format!(
            "username must be {USERNAME_MIN}-{USERNAME_MAX} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(EngineError::InvalidInput(
            "username may only contain letters, digits, '_' and '.'".into(),
        ));
    }
    Ok(())
}

impl Database {
    /// Provision a user. Usernames are unique ignoring ASCII case.
    pub fn create_user(
        &self,
        username: &str,
        avatar_ref: Option<&str>,
        utc_offset_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<User> {
        validate_username(username)?;
        if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&utc_offset_minutes) {
            return Err(EngineError::InvalidInput(format!(
                "utc offset must be within {MIN_UTC_OFFSET_MINUTES}..={MAX_UTC_OFFSET_MINUTES} minutes"
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            avatar_ref: avatar_ref.map(str::to_string),
            utc_offset_minutes,
            created_at: now,
        };

        self.with_tx(|tx| {
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1 COLLATE NOCASE)",
                [username],
                |row| row.get(0),
            )?;
            if taken {
                return Err(EngineError::Conflict(format!("username '{username}' is taken")));
            }

            tx.execute(
                "INSERT INTO users (id, username, avatar_ref, utc_offset_minutes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.avatar_ref,
                    user.utc_offset_minutes,
                    encode_ts(now),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.with_conn(|conn| require_user(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users u WHERE u.username = ?1 COLLATE NOCASE",
                UserRow::COLUMNS
            );
            conn.query_row(&sql, [username], UserRow::from_row)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
    }

    /// Lifetime totals shown on a profile.
    pub fn user_stats(&self, id: Uuid) -> Result<UserStats> {
        self.with_conn(|conn| {
            require_user(conn, id)?;
            let (posts, votes): (i64, i64) = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM posts WHERE author_id = ?1),
                        (SELECT COUNT(*) FROM votes WHERE voter_id = ?1)",
                [id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(UserStats {
                post_count: posts.unsigned_abs(),
                vote_count: votes.unsigned_abs(),
            })
        })
    }
}

pub(crate) fn find_user(conn: &Connection, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", UserRow::COLUMNS);
    conn.query_row(&sql, [id.to_string()], UserRow::from_row)
        .optional()?
        .map(User::try_from)
        .transpose()
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> Result<User> {
    find_user(conn, id)?.ok_or_else(|| EngineError::NotFound(format!("user {id}")))
}
