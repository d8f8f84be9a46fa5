use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE COLLATE NOCASE,
                avatar_ref          TEXT,
                utc_offset_minutes  INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT,
                image_ref   TEXT,
                self_rating INTEGER NOT NULL CHECK (self_rating BETWEEN 1 AND 5),
                kind        TEXT NOT NULL CHECK (kind IN ('global', 'story')),
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_posts_created ON posts(created_at);
            CREATE INDEX idx_posts_author ON posts(author_id, created_at);

            -- Vote ledger: one live row per (post, voter).
            CREATE TABLE votes (
                post_id     TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                voter_id    TEXT NOT NULL REFERENCES users(id),
                stars       INTEGER NOT NULL CHECK (stars BETWEEN 1 AND 5),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (post_id, voter_id)
            );

            CREATE INDEX idx_votes_voter ON votes(voter_id);

            -- Derived summary, maintained in the same transaction as the ledger.
            CREATE TABLE post_ratings (
                post_id     TEXT PRIMARY KEY REFERENCES posts(id) ON DELETE CASCADE,
                vote_count  INTEGER NOT NULL DEFAULT 0,
                star_total  INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE friendships (
                id          TEXT PRIMARY KEY,
                sender_id   TEXT NOT NULL REFERENCES users(id),
                receiver_id TEXT NOT NULL REFERENCES users(id),
                status      TEXT NOT NULL CHECK (status IN ('pending', 'accepted')),
                pair_lo     TEXT NOT NULL,
                pair_hi     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                CHECK (sender_id <> receiver_id),
                UNIQUE (pair_lo, pair_hi)
            );

            CREATE INDEX idx_friendships_sender ON friendships(sender_id, status);
            CREATE INDEX idx_friendships_receiver ON friendships(receiver_id, status);

            CREATE TABLE daily_progress (
                user_id      TEXT NOT NULL REFERENCES users(id),
                date         TEXT NOT NULL,
                post_count   INTEGER NOT NULL DEFAULT 0,
                vote_count   INTEGER NOT NULL DEFAULT 0,
                completed    INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                PRIMARY KEY (user_id, date)
            );

            CREATE TABLE streaks (
                user_id             TEXT PRIMARY KEY REFERENCES users(id),
                current_streak      INTEGER NOT NULL DEFAULT 0,
                longest_streak      INTEGER NOT NULL DEFAULT 0,
                last_completed_date TEXT,
                updated_at          TEXT NOT NULL
            );

            -- Append-only; survives post deletion.
            CREATE TABLE events (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                kind        TEXT NOT NULL,
                actor_id    TEXT NOT NULL,
                subject_id  TEXT NOT NULL,
                payload     TEXT NOT NULL,
                occurred_at TEXT NOT NULL
            );

            CREATE INDEX idx_events_actor ON events(actor_id, seq);

            CREATE TABLE outbox (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      TEXT NOT NULL,
                event        TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                delivered_at TEXT
            );

            CREATE INDEX idx_outbox_pending ON outbox(delivered_at, seq);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("database migrations complete");
    Ok(())
}
