use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Response}, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{db::Conversation, include_res, profiles, session, unread::UnreadCounters, AppError, AppResult, AppState};

/// One row of the conversation list: the pairing plus the counterpart's
/// display attributes, most recent activity, and that entry's unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub conversation: Conversation,
    pub counterpart_id: String,
    pub counterpart_name: String,
    pub counterpart_username: String,
    pub counterpart_avatar_url: String,
    pub last_activity: i64,
    pub unread: i64,
}

/// Conversations where the profile is either participant, most recent
/// activity first.
pub async fn list_conversations(
    pool: &SqlitePool,
    profile_id: &str,
) -> AppResult<Vec<ConversationEntry>> {
    type Row = (
        String, String, String, String, i64,
        String, String, String, String,
        i64, i64,
    );
    let rows: Vec<Row> = sqlx::query_as(
        "SELECT c.id, c.user1_id, c.user2_id, c.status, c.created_at, \
                p.id, p.full_name, p.username, p.avatar_url, \
                COALESCE(MAX(m.created_at), c.created_at) AS last_activity, \
                COALESCE(SUM(CASE WHEN m.read_at IS NULL AND m.sender_id<>? THEN 1 ELSE 0 END), 0) AS unread \
         FROM conversations c \
         JOIN profiles p ON p.id = CASE WHEN c.user1_id=? THEN c.user2_id ELSE c.user1_id END \
         LEFT JOIN messages m ON m.conversation_id = c.id \
         WHERE c.user1_id=? OR c.user2_id=? \
         GROUP BY c.id \
         ORDER BY last_activity DESC",
    )
    .bind(profile_id)
    .bind(profile_id)
    .bind(profile_id)
    .bind(profile_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, user1_id, user2_id, status, created_at, cp_id, cp_name, cp_username, cp_avatar, last_activity, unread)| {
            ConversationEntry {
                conversation: Conversation { id, user1_id, user2_id, status, created_at },
                counterpart_id: cp_id,
                counterpart_name: cp_name,
                counterpart_username: cp_username,
                counterpart_avatar_url: cp_avatar,
                last_activity,
                unread,
            }
        })
        .collect())
}

#[debug_handler]
pub(crate) async fn conversations_page(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let entries = list_conversations(&db_pool, &viewer.id).await?;

    let mut items = String::new();
    for entry in &entries {
        items += &include_res!(str, "/pages/conversation_item.html")
            .replace("{conversation_id}", &entry.conversation.id)
            .replace("{counterpart_name}", &entry.counterpart_name)
            .replace("{counterpart_avatar_url}", &entry.counterpart_avatar_url)
            .replace("{status}", &entry.conversation.status)
            .replace("{unread}", &entry.unread.to_string());
    }

    Ok(Html(
        include_res!(str, "/pages/conversations.html")
            .replace("{full_name}", &viewer.full_name)
            .replace("{items}", &items),
    )
    .into_response())
}

#[derive(Serialize)]
pub(crate) struct UnreadCount {
    unread: i64,
}

/// Badge endpoint, served from the incrementally maintained counter.
#[debug_handler(state = AppState)]
pub(crate) async fn unread_count(
    State(db_pool): State<SqlitePool>,
    State(unread): State<UnreadCounters>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    Ok(Json(UnreadCount { unread: unread.get(&viewer.id) }).into_response())
}
