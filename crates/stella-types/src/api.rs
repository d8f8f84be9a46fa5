use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    DailyProgress, Event, EventKind, FeedFilter, Friendship, FriendshipStatus, PostKind,
    Relationship, Streak,
};

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub avatar_ref: Option<String>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    pub id: Uuid,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub post_count: u64,
    pub vote_count: u64,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreatePostRequest {
    pub author_id: Uuid,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    /// Range-checked by the engine so out-of-range values surface as
    /// `invalid_input` rather than a body rejection.
    pub self_rating: i64,
    pub kind: PostKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostResponse {
    pub post_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActingUserRequest {
    pub acting_user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub author_avatar_ref: Option<String>,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub self_rating: u8,
    pub kind: PostKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub average_rating: f64,
    pub vote_count: u32,
    /// Stars the requesting viewer gave this post, if any.
    pub viewer_vote: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub viewer_id: Uuid,
    #[serde(default)]
    pub filter: FeedFilter,
    #[serde(default = "default_feed_limit")]
    pub limit: u32,
}

fn default_feed_limit() -> u32 {
    50
}

// -- Votes --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CastVoteRequest {
    pub voter_id: Uuid,
    pub stars: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingResponse {
    pub average_rating: f64,
    pub vote_count: u32,
}

// -- Friendships --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendFriendRequest {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestResponse {
    pub friendship_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipAction {
    Accept,
    Reject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateFriendshipRequest {
    pub acting_user_id: Uuid,
    pub action: FriendshipAction,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Friendship> for FriendshipResponse {
    fn from(f: Friendship) -> Self {
        Self {
            id: f.id,
            sender_id: f.sender_id,
            receiver_id: f.receiver_id,
            status: f.status,
            created_at: f.created_at,
        }
    }
}

/// An accepted friend, from the listing user's side.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendResponse {
    pub friendship_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub avatar_ref: Option<String>,
}

/// A pending request addressed to the listing user.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestSummary {
    pub friendship_id: Uuid,
    pub sender_id: Uuid,
    pub sender_username: String,
    pub sender_avatar_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipResponse {
    pub user_id: Uuid,
    pub other_user_id: Uuid,
    pub status: Relationship,
}

// -- Quest & streak --

#[derive(Debug, Deserialize)]
pub struct DailyProgressQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgressResponse {
    pub date: NaiveDate,
    pub post_count: u32,
    pub vote_count: u32,
    pub completed: bool,
    pub posts_remaining: u32,
    pub votes_remaining: u32,
}

impl From<DailyProgress> for DailyProgressResponse {
    fn from(p: DailyProgress) -> Self {
        Self {
            date: p.date,
            post_count: p.post_count,
            vote_count: p.vote_count,
            completed: p.completed,
            posts_remaining: p.posts_remaining(),
            votes_remaining: p.votes_remaining(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResponse {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_date: Option<NaiveDate>,
}

impl From<Streak> for StreakResponse {
    fn from(s: Streak) -> Self {
        Self {
            current_streak: s.current_streak,
            longest_streak: s.longest_streak,
            last_completed_date: s.last_completed_date,
        }
    }
}

// -- Event log --

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default = "default_event_limit")]
    pub limit: u32,
}

fn default_event_limit() -> u32 {
    50
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub seq: i64,
    pub kind: EventKind,
    pub actor_id: Uuid,
    pub subject_id: Uuid,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(e: Event) -> Self {
        Self {
            seq: e.seq,
            kind: e.kind,
            actor_id: e.actor_id,
            subject_id: e.subject_id,
            payload: e.payload,
            occurred_at: e.occurred_at,
        }
    }
}
