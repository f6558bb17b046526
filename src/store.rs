use sqlx::SqlitePool;

use crate::{db::Message, AppResult};

/// In-memory ordered message list for the one active conversation view.
///
/// Ordering is ascending `created_at`, ties kept in insertion order (UUIDv7
/// ids make DB-side id order agree with this). Appends de-duplicate by id so
/// the initial fetch and a racing realtime event cannot double-insert.
pub struct MessageStore {
    conversation_id: String,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn oldest_created_at(&self) -> Option<i64> {
        self.messages.first().map(|m| m.created_at)
    }

    pub fn newest_created_at(&self) -> Option<i64> {
        self.messages.last().map(|m| m.created_at)
    }

    /// Switches the store to another conversation, dropping prior messages
    /// so stale content is never shown while the new page is in flight.
    pub fn reset(&mut self, conversation_id: impl Into<String>) {
        self.conversation_id = conversation_id.into();
        self.messages.clear();
    }

    /// Installs the initial page (ascending). Returns false and discards the
    /// page when it belongs to a conversation that is no longer selected.
    pub fn replace_initial(&mut self, conversation_id: &str, page: Vec<Message>) -> bool {
        if conversation_id != self.conversation_id {
            return false;
        }
        self.messages = page;
        true
    }

    /// Prepends an older page (ascending, all strictly older than what is
    /// loaded). Duplicate ids are dropped.
    pub fn prepend_older(&mut self, page: Vec<Message>) {
        let fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| m.conversation_id == self.conversation_id && !self.contains(&m.id))
            .collect();
        self.messages.splice(0..0, fresh);
    }

    /// Ordered insert; duplicates and events for other conversations are a
    /// no-op. Returns whether the message was actually added.
    pub fn append(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id || self.contains(&message.id) {
            return false;
        }
        let at = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Local mirror of read marking, so re-rendered rows agree with the DB.
    pub fn mark_inbound_read(&mut self, viewer_profile_id: &str, read_at: i64) {
        for m in &mut self.messages {
            if m.sender_id != viewer_profile_id && m.read_at.is_none() {
                m.read_at = Some(read_at);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }
}

const MESSAGE_COLUMNS: &str =
    "id,conversation_id,sender_id,content,media_type,created_at,read_at";

/// Most-recent `page_size` messages, returned oldest-first.
pub async fn fetch_initial(
    pool: &SqlitePool,
    conversation_id: &str,
    page_size: i64,
) -> AppResult<Vec<Message>> {
    let mut rows: Vec<Message> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id=? \
         ORDER BY created_at DESC, id DESC LIMIT ?"
    ))
    .bind(conversation_id)
    .bind(page_size)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// Backward pagination: up to `limit` messages strictly older than
/// `before_ts`, oldest-first. Empty when exhausted.
pub async fn fetch_older(
    pool: &SqlitePool,
    conversation_id: &str,
    before_ts: i64,
    limit: i64,
) -> AppResult<Vec<Message>> {
    let mut rows: Vec<Message> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id=? AND created_at < ? \
         ORDER BY created_at DESC, id DESC LIMIT ?"
    ))
    .bind(conversation_id)
    .bind(before_ts)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// Catch-up fetch for a view that fell behind its realtime feed: everything
/// at or after `after_ts`, oldest-first. Inclusive on purpose — a message
/// sharing the newest loaded timestamp must not be skipped; the store's id
/// de-duplication absorbs the overlap.
pub async fn fetch_newer(
    pool: &SqlitePool,
    conversation_id: &str,
    after_ts: i64,
) -> AppResult<Vec<Message>> {
    Ok(sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id=? AND created_at >= ? \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(conversation_id)
    .bind(after_ts)
    .fetch_all(pool)
    .await?)
}
