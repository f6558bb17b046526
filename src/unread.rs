use std::{collections::HashMap, sync::{Arc, Mutex}};

use sqlx::SqlitePool;

use crate::AppResult;

/// Process-wide unread counts, keyed by profile id.
///
/// Single-writer contract: only the insert fan-out (`note_insert`, +1 per
/// inbound message), the read tracker (`note_read`, minus the rows it
/// actually transitioned), and conversation closing (which removes the
/// closed conversation's remaining unread from the count) mutate a count.
/// Everything else reads or reconciles from the database.
#[derive(Clone, Default)]
pub struct UnreadCounters {
    inner: Arc<Mutex<HashMap<String, i64>>>,
}

impl UnreadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, profile_id: &str) -> i64 {
        self.inner.lock().unwrap().get(profile_id).copied().unwrap_or(0)
    }

    /// A message was inserted with `profile_id` as the recipient.
    pub fn note_insert(&self, profile_id: &str) {
        let mut counts = self.inner.lock().unwrap();
        *counts.entry(profile_id.to_owned()).or_insert(0) += 1;
    }

    /// `transitioned` rows flipped from unread to read for this viewer.
    pub fn note_read(&self, profile_id: &str, transitioned: i64) {
        if transitioned <= 0 {
            return;
        }
        let mut counts = self.inner.lock().unwrap();
        let entry = counts.entry(profile_id.to_owned()).or_insert(0);
        *entry = (*entry - transitioned).max(0);
    }

    /// A conversation holding `unread` still-unread inbound messages for
    /// this profile was closed; those rows no longer count (the counter
    /// covers active conversations only, as `reconcile` does).
    pub fn note_conversation_closed(&self, profile_id: &str, unread: i64) {
        self.note_read(profile_id, unread);
    }

    /// Recomputes the count from scratch across the profile's active
    /// conversations. Reconciliation fallback on (re)connect.
    pub async fn reconcile(&self, pool: &SqlitePool, profile_id: &str) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages m \
             JOIN conversations c ON c.id = m.conversation_id \
             WHERE c.status='active' AND (c.user1_id=? OR c.user2_id=?) \
               AND m.sender_id<>? AND m.read_at IS NULL",
        )
        .bind(profile_id)
        .bind(profile_id)
        .bind(profile_id)
        .fetch_one(pool)
        .await?;
        self.inner.lock().unwrap().insert(profile_id.to_owned(), count);
        Ok(count)
    }

    /// Drops local state for a signed-out identity.
    pub fn clear(&self, profile_id: &str) {
        self.inner.lock().unwrap().remove(profile_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_read_balances_out() {
        let counters = UnreadCounters::new();
        counters.note_insert("p1");
        counters.note_insert("p1");
        assert_eq!(counters.get("p1"), 2);
        counters.note_read("p1", 2);
        assert_eq!(counters.get("p1"), 0);
    }

    #[test]
    fn read_never_goes_negative() {
        let counters = UnreadCounters::new();
        counters.note_insert("p1");
        counters.note_read("p1", 5);
        assert_eq!(counters.get("p1"), 0);
    }

    #[test]
    fn counts_are_scoped_per_profile() {
        let counters = UnreadCounters::new();
        counters.note_insert("p1");
        counters.note_insert("p2");
        counters.note_read("p1", 1);
        assert_eq!(counters.get("p1"), 0);
        assert_eq!(counters.get("p2"), 1);
    }

    #[test]
    fn clear_drops_the_entry() {
        let counters = UnreadCounters::new();
        counters.note_insert("p1");
        counters.clear("p1");
        assert_eq!(counters.get("p1"), 0);
    }
}
