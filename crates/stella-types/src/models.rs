use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stories disappear from every read path this many hours after creation.
pub const STORY_TTL_HOURS: i64 = 24;

pub const MAX_POST_TEXT_CHARS: usize = 500;

/// Daily quest: at least this many posts and votes on the same local day.
pub const QUEST_REQUIRED_POSTS: u32 = 1;
pub const QUEST_REQUIRED_VOTES: u32 = 3;

/// Accepted range for a user's fixed UTC offset, in minutes.
pub const MIN_UTC_OFFSET_MINUTES: i32 = -12 * 60;
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar_ref: Option<String>,
    pub utc_offset_minutes: i32,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The calendar date `at` falls on in this user's reference timezone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        local_date(at, self.utc_offset_minutes)
    }
}

/// Resolve the calendar date for an instant under a fixed UTC offset.
/// Out-of-range offsets fall back to UTC.
pub fn local_date(at: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    at.with_timezone(&offset).date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Global,
    Story,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Story => "story",
        }
    }
}

impl FromStr for PostKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "story" => Ok(Self::Story),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub self_rating: u8,
    pub kind: PostKind,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// When the post stops being visible, if it ever does.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            PostKind::Global => None,
            PostKind::Story => Some(self.created_at + Duration::hours(STORY_TTL_HOURS)),
        }
    }

    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_none_or(|expiry| now < expiry)
    }
}

/// Which posts a feed read returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFilter {
    #[default]
    All,
    Global,
    Story,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub post_id: Uuid,
    pub voter_id: Uuid,
    pub stars: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived aggregate kept next to the vote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub vote_count: u32,
    pub star_total: u32,
}

impl Rating {
    pub const EMPTY: Rating = Rating {
        vote_count: 0,
        star_total: 0,
    };

    /// Full-precision mean; rounding is left to presentation.
    pub fn average(&self) -> f64 {
        if self.vote_count == 0 {
            0.0
        } else {
            f64::from(self.star_total) / f64::from(self.vote_count)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
}

impl FriendshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

impl FromStr for FriendshipStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Relationship between two users as seen from one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    None,
    PendingSent,
    PendingReceived,
    Accepted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other party, if `user_id` is part of this friendship.
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        if self.sender_id == user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Direction-aware view of this row from `viewer`'s side.
    pub fn relationship_for(&self, viewer: Uuid) -> Relationship {
        match self.status {
            FriendshipStatus::Accepted if self.involves(viewer) => Relationship::Accepted,
            FriendshipStatus::Pending if self.sender_id == viewer => Relationship::PendingSent,
            FriendshipStatus::Pending if self.receiver_id == viewer => {
                Relationship::PendingReceived
            }
            _ => Relationship::None,
        }
    }
}

/// Order-independent key for a user pair.
pub fn normalized_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub post_count: u32,
    pub vote_count: u32,
    pub completed: bool,
}

impl DailyProgress {
    pub fn empty(user_id: Uuid, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            post_count: 0,
            vote_count: 0,
            completed: false,
        }
    }

    pub fn meets_requirements(&self) -> bool {
        self.post_count >= QUEST_REQUIRED_POSTS && self.vote_count >= QUEST_REQUIRED_VOTES
    }

    pub fn posts_remaining(&self) -> u32 {
        QUEST_REQUIRED_POSTS.saturating_sub(self.post_count)
    }

    pub fn votes_remaining(&self) -> u32 {
        QUEST_REQUIRED_VOTES.saturating_sub(self.vote_count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub user_id: Uuid,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_completed_date: Option<NaiveDate>,
}

impl Streak {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            current_streak: 0,
            longest_streak: 0,
            last_completed_date: None,
        }
    }
}

/// Kinds of rows in the append-only event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    PostCreated,
    PostDeleted,
    VoteCast,
    VoteChanged,
    FriendRequested,
    FriendAccepted,
    FriendRejected,
    FriendRemoved,
    QuestCompleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostCreated => "post-created",
            Self::PostDeleted => "post-deleted",
            Self::VoteCast => "vote-cast",
            Self::VoteChanged => "vote-changed",
            Self::FriendRequested => "friend-requested",
            Self::FriendAccepted => "friend-accepted",
            Self::FriendRejected => "friend-rejected",
            Self::FriendRemoved => "friend-removed",
            Self::QuestCompleted => "quest-completed",
        }
    }
}

impl FromStr for EventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "post-created" => Self::PostCreated,
            "post-deleted" => Self::PostDeleted,
            "vote-cast" => Self::VoteCast,
            "vote-changed" => Self::VoteChanged,
            "friend-requested" => Self::FriendRequested,
            "friend-accepted" => Self::FriendAccepted,
            "friend-rejected" => Self::FriendRejected,
            "friend-removed" => Self::FriendRemoved,
            "quest-completed" => Self::QuestCompleted,
            other => return Err(UnknownVariant(other.to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub seq: i64,
    pub kind: EventKind,
    pub actor_id: Uuid,
    pub subject_id: Uuid,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}
