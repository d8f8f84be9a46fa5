//! Friendship graph: at most one row per unordered user pair, moving
//! none -> pending -> accepted and back to none on reject or unfriend.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use stella_types::events::{FanoutEvent, FriendshipChange};
use stella_types::models::{
    EventKind, Friendship, FriendshipStatus, Relationship, User, normalized_pair,
};

use crate::Database;
use crate::error::{EngineError, Result};
use crate::models::{FriendshipRow, OptionalExt, UserRow, encode_ts};
use crate::{events, outbox, users};

#[derive(Debug, Clone)]
pub struct Friend {
    pub friendship_id: Uuid,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub friendship: Friendship,
    pub sender: User,
}

fn find(conn: &Connection, id: Uuid) -> Result<Option<Friendship>> {
    let sql = format!("SELECT {} FROM friendships f WHERE f.id = ?1", FriendshipRow::COLUMNS);
    conn.query_row(&sql, [id.to_string()], FriendshipRow::from_row)
        .optional()?
        .map(Friendship::try_from)
        .transpose()
}

fn require(conn: &Connection, id: Uuid) -> Result<Friendship> {
    find(conn, id)?.ok_or_else(|| EngineError::NotFound(format!("friendship {id}")))
}

fn find_between(conn: &Connection, a: Uuid, b: Uuid) -> Result<Option<Friendship>> {
    let (lo, hi) = normalized_pair(a, b);
    let sql = format!(
        "SELECT {} FROM friendships f WHERE f.pair_lo = ?1 AND f.pair_hi = ?2",
        FriendshipRow::COLUMNS
    );
    conn.query_row(&sql, [lo.to_string(), hi.to_string()], FriendshipRow::from_row)
        .optional()?
        .map(Friendship::try_from)
        .transpose()
}

/// Record the transition and notify both parties.
fn publish(
    conn: &Connection,
    friendship: &Friendship,
    kind: EventKind,
    change: FriendshipChange,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    events::append(
        conn,
        kind,
        actor_id,
        friendship.id,
        &serde_json::json!({
            "senderId": friendship.sender_id,
            "receiverId": friendship.receiver_id,
        }),
        now,
    )?;
    outbox::enqueue_all(
        conn,
        &[
            FanoutEvent::friendship_changed(friendship.sender_id, friendship, change),
            FanoutEvent::friendship_changed(friendship.receiver_id, friendship, change),
        ],
        now,
    )
}

impl Database {
    pub fn send_friend_request(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Friendship> {
        if sender_id == receiver_id {
            return Err(EngineError::InvalidInput(
                "cannot send a friend request to yourself".into(),
            ));
        }

        let friendship = self.with_tx(|tx| {
            users::require_user(tx, sender_id)?;
            users::require_user(tx, receiver_id)?;

            if let Some(existing) = find_between(tx, sender_id, receiver_id)? {
                let msg = match existing.status {
                    FriendshipStatus::Accepted => "already friends",
                    FriendshipStatus::Pending => "a friend request is already pending",
                };
                return Err(EngineError::Conflict(msg.into()));
            }

            let friendship = Friendship {
                id: Uuid::new_v4(),
                sender_id,
                receiver_id,
                status: FriendshipStatus::Pending,
                created_at: now,
            };
            let (lo, hi) = normalized_pair(sender_id, receiver_id);
            tx.execute(
                "INSERT INTO friendships
                    (id, sender_id, receiver_id, status, pair_lo, pair_hi, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    friendship.id.to_string(),
                    sender_id.to_string(),
                    receiver_id.to_string(),
                    friendship.status.as_str(),
                    lo.to_string(),
                    hi.to_string(),
                    encode_ts(now),
                ],
            )?;

            publish(
                tx,
                &friendship,
                EventKind::FriendRequested,
                FriendshipChange::Requested,
                sender_id,
                now,
            )?;
            Ok(friendship)
        })?;

        tracing::debug!(
            friendship_id = %friendship.id,
            %sender_id,
            %receiver_id,
            "friend request sent"
        );
        Ok(friendship)
    }

    pub fn accept_friend_request(
        &self,
        request_id: Uuid,
        acting_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Friendship> {
        self.with_tx(|tx| {
            let mut friendship = require(tx, request_id)?;
            if friendship.receiver_id != acting_user_id {
                return Err(EngineError::Forbidden(
                    "only the receiver can accept a friend request".into(),
                ));
            }
            if friendship.status != FriendshipStatus::Pending {
                return Err(EngineError::Conflict("friend request is not pending".into()));
            }

            tx.execute(
                "UPDATE friendships SET status = 'accepted', updated_at = ?2 WHERE id = ?1",
                rusqlite::params![request_id.to_string(), encode_ts(now)],
            )?;
            friendship.status = FriendshipStatus::Accepted;

            publish(
                tx,
                &friendship,
                EventKind::FriendAccepted,
                FriendshipChange::Accepted,
                acting_user_id,
                now,
            )?;
            tracing::debug!(friendship_id = %request_id, "friend request accepted");
            Ok(friendship)
        })
    }

    /// Decline a pending request. The row is deleted so either side can ask again.
    pub fn reject_friend_request(
        &self,
        request_id: Uuid,
        acting_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Friendship> {
        self.with_tx(|tx| {
            let friendship = require(tx, request_id)?;
            if friendship.receiver_id != acting_user_id {
                return Err(EngineError::Forbidden(
                    "only the receiver can reject a friend request".into(),
                ));
            }
            if friendship.status == FriendshipStatus::Accepted {
                return Err(EngineError::Conflict(
                    "friend request was already accepted".into(),
                ));
            }

            tx.execute("DELETE FROM friendships WHERE id = ?1", [request_id.to_string()])?;
            publish(
                tx,
                &friendship,
                EventKind::FriendRejected,
                FriendshipChange::Rejected,
                acting_user_id,
                now,
            )?;
            tracing::debug!(friendship_id = %request_id, "friend request rejected");
            Ok(friendship)
        })
    }

    /// Remove an accepted friendship. Either party may do it.
    pub fn unfriend(
        &self,
        friendship_id: Uuid,
        acting_user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Friendship> {
        self.with_tx(|tx| {
            let friendship = require(tx, friendship_id)?;
            if !friendship.involves(acting_user_id) {
                return Err(EngineError::Forbidden("not part of this friendship".into()));
            }
            if friendship.status == FriendshipStatus::Pending {
                return Err(EngineError::Conflict(
                    "friend request is still pending".into(),
                ));
            }

            tx.execute("DELETE FROM friendships WHERE id = ?1", [friendship_id.to_string()])?;
            publish(
                tx,
                &friendship,
                EventKind::FriendRemoved,
                FriendshipChange::Removed,
                acting_user_id,
                now,
            )?;
            tracing::debug!(%friendship_id, "friendship removed");
            Ok(friendship)
        })
    }

    pub fn get_friendship(&self, id: Uuid) -> Result<Friendship> {
        self.with_conn(|conn| require(conn, id))
    }

    /// Accepted friends of `user_id`, by username.
    pub fn list_friends(&self, user_id: Uuid) -> Result<Vec<Friend>> {
        self.with_conn(|conn| {
            users::require_user(conn, user_id)?;
            let sql = format!(
                "SELECT f.id, {}
                 FROM friendships f
                 JOIN users u ON u.id = CASE WHEN f.sender_id = ?1 THEN f.receiver_id ELSE f.sender_id END
                 WHERE (f.sender_id = ?1 OR f.receiver_id = ?1) AND f.status = 'accepted'
                 ORDER BY u.username COLLATE NOCASE",
                UserRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, UserRow::from_row_at(row, 1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, user)| {
                    Ok(Friend {
                        friendship_id: crate::models::decode_id(&id)?,
                        user: User::try_from(user)?,
                    })
                })
                .collect()
        })
    }

    /// Requests waiting on `user_id`, oldest first.
    pub fn list_pending_received(&self, user_id: Uuid) -> Result<Vec<PendingRequest>> {
        self.with_conn(|conn| {
            users::require_user(conn, user_id)?;
            let sql = format!(
                "SELECT {}, {}
                 FROM friendships f
                 JOIN users u ON u.id = f.sender_id
                 WHERE f.receiver_id = ?1 AND f.status = 'pending'
                 ORDER BY f.created_at",
                FriendshipRow::COLUMNS,
                UserRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((
                        FriendshipRow::from_row(row)?,
                        UserRow::from_row_at(row, FriendshipRow::WIDTH)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(friendship, sender)| {
                    Ok(PendingRequest {
                        friendship: Friendship::try_from(friendship)?,
                        sender: User::try_from(sender)?,
                    })
                })
                .collect()
        })
    }

    /// Relationship between two users from `viewer_id`'s side.
    pub fn relationship_between(&self, viewer_id: Uuid, other_id: Uuid) -> Result<Relationship> {
        if viewer_id == other_id {
            return Ok(Relationship::None);
        }
        self.with_conn(|conn| {
            Ok(find_between(conn, viewer_id, other_id)?
                .map_or(Relationship::None, |f| f.relationship_for(viewer_id)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fresh_db, noon, user};
    use std::sync::Arc;
    use stella_types::events::FanoutKind;

    #[test]
    fn request_then_accept() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        let req = db.send_friend_request(a, b, noon(1)).unwrap();
        assert_eq!(db.relationship_between(a, b).unwrap(), Relationship::PendingSent);
        assert_eq!(db.relationship_between(b, a).unwrap(), Relationship::PendingReceived);

        let pending = db.list_pending_received(b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender.username, "alice");
        assert!(db.list_pending_received(a).unwrap().is_empty());

        let accepted = db.accept_friend_request(req.id, b, noon(1)).unwrap();
        assert_eq!(accepted.status, FriendshipStatus::Accepted);
        assert_eq!(db.relationship_between(a, b).unwrap(), Relationship::Accepted);
        assert_eq!(db.relationship_between(b, a).unwrap(), Relationship::Accepted);

        let friends_of_a = db.list_friends(a).unwrap();
        let friends_of_b = db.list_friends(b).unwrap();
        assert_eq!(friends_of_a[0].user.id, b);
        assert_eq!(friends_of_b[0].user.id, a);
    }

    #[test]
    fn duplicate_and_reverse_requests_conflict() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        db.send_friend_request(a, b, noon(1)).unwrap();

        for (from, to) in [(a, b), (b, a)] {
            let err = db.send_friend_request(from, to, noon(1)).unwrap_err();
            assert!(matches!(err, EngineError::Conflict(_)));
        }
    }

    #[test]
    fn rejects_self_and_unknown_users() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        assert!(matches!(
            db.send_friend_request(a, a, noon(1)),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            db.send_friend_request(a, Uuid::new_v4(), noon(1)),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn only_the_receiver_answers() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        let req = db.send_friend_request(a, b, noon(1)).unwrap();

        for actor in [a, c] {
            assert!(matches!(
                db.accept_friend_request(req.id, actor, noon(1)),
                Err(EngineError::Forbidden(_))
            ));
            assert!(matches!(
                db.reject_friend_request(req.id, actor, noon(1)),
                Err(EngineError::Forbidden(_))
            ));
        }
        assert!(matches!(
            db.accept_friend_request(Uuid::new_v4(), b, noon(1)),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn reject_frees_the_pair() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let req = db.send_friend_request(a, b, noon(1)).unwrap();

        db.reject_friend_request(req.id, b, noon(1)).unwrap();
        assert_eq!(db.relationship_between(a, b).unwrap(), Relationship::None);
        assert!(matches!(db.get_friendship(req.id), Err(EngineError::NotFound(_))));

        // Either side may try again.
        db.send_friend_request(b, a, noon(2)).unwrap();
    }

    #[test]
    fn state_guards() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let req = db.send_friend_request(a, b, noon(1)).unwrap();

        assert!(matches!(db.unfriend(req.id, a, noon(1)), Err(EngineError::Conflict(_))));

        db.accept_friend_request(req.id, b, noon(1)).unwrap();
        assert!(matches!(
            db.accept_friend_request(req.id, b, noon(1)),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            db.reject_friend_request(req.id, b, noon(1)),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn either_party_unfriends() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        let req = db.send_friend_request(a, b, noon(1)).unwrap();
        db.accept_friend_request(req.id, b, noon(1)).unwrap();

        assert!(matches!(db.unfriend(req.id, c, noon(1)), Err(EngineError::Forbidden(_))));
        db.unfriend(req.id, b, noon(2)).unwrap();
        assert!(db.list_friends(a).unwrap().is_empty());
        assert_eq!(db.relationship_between(a, b).unwrap(), Relationship::None);
    }

    #[test]
    fn transitions_notify_both_parties() {
        let (_dir, db) = fresh_db();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let req = db.send_friend_request(a, b, noon(1)).unwrap();
        db.accept_friend_request(req.id, b, noon(1)).unwrap();

        let fanout: Vec<_> = db
            .pending_outbox(100)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.event)
            .filter(|e| e.kind == FanoutKind::FriendshipChanged)
            .collect();
        assert_eq!(fanout.len(), 4);
        assert_eq!(fanout.iter().filter(|e| e.user_id == a).count(), 2);
        assert_eq!(fanout.iter().filter(|e| e.user_id == b).count(), 2);
    }

    #[test]
    fn crossing_requests_leave_one_row() {
        let (_dir, db) = fresh_db();
        let db = Arc::new(db);
        let a = user(&db, "alice");
        let b = user(&db, "bob");

        let handles: Vec<_> = [(a, b), (b, a)]
            .into_iter()
            .map(|(from, to)| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || db.send_friend_request(from, to, noon(1)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(EngineError::Conflict(_))))
        );
        let rel = db.relationship_between(a, b).unwrap();
        assert!(matches!(rel, Relationship::PendingSent | Relationship::PendingReceived));
    }
}
