use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use stella_types::models::PostKind;

use crate::Database;

/// A database in a fresh temp dir. Keep the `TempDir` alive for the test.
pub fn fresh_db() -> (TempDir, Database) {
    let dir = TempDir::new().expect("temp dir");
    let db = Database::open(&dir.path().join("stella.db")).expect("open db");
    (dir, db)
}

/// 12:00 UTC on the given day of March 2026.
pub fn noon(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

pub fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

pub fn user(db: &Database, name: &str) -> Uuid {
    db.create_user(name, None, 0, noon(1)).expect("create user").id
}

pub fn global_post(db: &Database, author: Uuid, at: DateTime<Utc>) -> Uuid {
    db.create_post(author, Some("hello"), None, 4, PostKind::Global, at)
        .expect("create post")
        .post
        .id
}
