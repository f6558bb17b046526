use sqlx::SqlitePool;

use crate::{db, unread::UnreadCounters, AppResult};

/// Marks every unread inbound message in the conversation as read for the
/// viewer and decrements the viewer's unread counter by the rows actually
/// transitioned (the UPDATE's affected count, never a recomputed total, so a
/// concurrent increment from another conversation is not clobbered).
/// Idempotent; a sender can never mark their own messages read.
pub async fn mark_inbound_as_read(
    pool: &SqlitePool,
    counters: &UnreadCounters,
    conversation_id: &str,
    viewer_profile_id: &str,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE messages SET read_at=? \
         WHERE conversation_id=? AND sender_id<>? AND read_at IS NULL",
    )
    .bind(db::now_millis())
    .bind(conversation_id)
    .bind(viewer_profile_id)
    .execute(pool)
    .await?;

    let transitioned = result.rows_affected();
    if transitioned > 0 {
        counters.note_read(viewer_profile_id, transitioned as i64);
    }
    Ok(transitioned)
}
