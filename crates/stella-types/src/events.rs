use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::{DailyProgress, Friendship, Relationship, Streak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanoutKind {
    FriendshipChanged,
    QuestProgress,
    StreakChanged,
}

/// State delta delivered to the subscribers of `user_id`.
///
/// Wire shape: `{ "type": ..., "userId": ..., "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEvent {
    #[serde(rename = "type")]
    pub kind: FanoutKind,
    pub user_id: Uuid,
    pub payload: serde_json::Value,
}

/// What happened to a friendship row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipChange {
    Requested,
    Accepted,
    Rejected,
    Removed,
}

impl FanoutEvent {
    /// Friendship delta as seen by `user_id`. After a reject or unfriend the
    /// row is gone, so the relationship reads `none`.
    pub fn friendship_changed(user_id: Uuid, friendship: &Friendship, change: FriendshipChange) -> Self {
        let relationship = match change {
            FriendshipChange::Rejected | FriendshipChange::Removed => Relationship::None,
            FriendshipChange::Requested | FriendshipChange::Accepted => {
                friendship.relationship_for(user_id)
            }
        };
        Self {
            kind: FanoutKind::FriendshipChanged,
            user_id,
            payload: json!({
                "friendshipId": friendship.id,
                "change": change,
                "otherUserId": friendship.counterpart(user_id),
                "relationship": relationship,
            }),
        }
    }

    pub fn quest_progress(progress: &DailyProgress) -> Self {
        Self {
            kind: FanoutKind::QuestProgress,
            user_id: progress.user_id,
            payload: json!({
                "date": progress.date,
                "postCount": progress.post_count,
                "voteCount": progress.vote_count,
                "completed": progress.completed,
            }),
        }
    }

    pub fn streak_changed(streak: &Streak) -> Self {
        Self {
            kind: FanoutKind::StreakChanged,
            user_id: streak.user_id,
            payload: json!({
                "currentStreak": streak.current_streak,
                "longestStreak": streak.longest_streak,
                "lastCompletedDate": streak.last_completed_date,
            }),
        }
    }
}

/// Frames sent FROM server TO a subscribed WebSocket client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayFrame {
    /// Subscription accepted; fan-out events for this user follow.
    Ready {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },

    /// A state delta for the subscribed user.
    Fanout(FanoutEvent),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Start receiving fan-out events addressed to `user_id`.
    Subscribe {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
}
