use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_CLOSED: &str = "closed";

pub const ROLE_MEMBER: &str = "member";

pub const MEDIA_TEXT: &str = "text";

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    pub full_name: String,
    pub username: String,
    pub avatar_url: String,
    pub role: String,
    pub visibility: String,
    pub created_at: i64,

    // unique: id
    // unique: user_id
    // unique: username
}

impl Profile {
    pub fn is_staff(&self) -> bool {
        matches!(self.role.as_str(), "moderator" | "admin")
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub status: String,
    pub created_at: i64,

    // unique: id
    // at most one active row per unordered (user1_id, user2_id) pair,
    // enforced by looking up both orderings before insert
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    pub fn has_participant(&self, profile_id: &str) -> bool {
        self.user1_id == profile_id || self.user2_id == profile_id
    }

    pub fn counterpart_of(&self, profile_id: &str) -> Option<&str> {
        if self.user1_id == profile_id {
            Some(&self.user2_id)
        } else if self.user2_id == profile_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub media_type: String,
    pub created_at: i64,
    pub read_at: Option<i64>,

    // unique: id
    // read_at transitions null -> set exactly once, by the recipient
}

/// Message timestamps are unix milliseconds so backward pagination and
/// ordering are exact.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}
