use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Response}, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db::{self, Conversation, Message}, include_res, profiles, realtime::RealtimeHub, session, store, unread::UnreadCounters, AppError, AppResult};

use super::open::conversation_by_id;

pub const PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
    pub(crate) media_type: Option<String>,
}

#[derive(Debug)]
pub enum SendOutcome {
    Sent(Message),
    /// Empty/whitespace-only input; nothing was persisted or published.
    Ignored,
}

/// Persists a message and fans it out: one realtime publish plus one unread
/// increment for the recipient. No optimistic append anywhere; the sender
/// sees their own message through the realtime echo, so both sides render
/// from the same source of truth.
pub async fn send_message(
    pool: &SqlitePool,
    hub: &RealtimeHub,
    counters: &UnreadCounters,
    conversation: &Conversation,
    sender_profile_id: &str,
    content: &str,
    media_type: &str,
) -> AppResult<SendOutcome> {
    if content.trim().is_empty() {
        return Ok(SendOutcome::Ignored);
    }
    if !conversation.is_active() {
        return Err(AppError::Conflict("conversation is closed"));
    }
    let recipient = conversation
        .counterpart_of(sender_profile_id)
        .ok_or(AppError::NotFound("conversation"))?
        .to_owned();

    let message = Message {
        id: Uuid::now_v7().to_string(),
        conversation_id: conversation.id.clone(),
        sender_id: sender_profile_id.to_owned(),
        content: content.to_owned(),
        media_type: media_type.to_owned(),
        created_at: db::now_millis(),
        read_at: None,
    };
    sqlx::query(
        "INSERT INTO messages (id,conversation_id,sender_id,content,media_type,created_at,read_at) \
         VALUES (?,?,?,?,?,?,NULL)",
    )
    .bind(&message.id)
    .bind(&message.conversation_id)
    .bind(&message.sender_id)
    .bind(&message.content)
    .bind(&message.media_type)
    .bind(message.created_at)
    .execute(pool)
    .await?;

    counters.note_insert(&recipient);
    hub.publish_insert(message.clone());

    Ok(SendOutcome::Sent(message))
}

#[derive(Deserialize)]
pub(crate) struct OlderQuery {
    before: i64,
}

/// Backward pagination, keyed by the caller's currently-oldest timestamp.
#[debug_handler]
pub(crate) async fn older(
    Path(conversation_id): Path<Uuid>,
    Query(OlderQuery { before }): Query<OlderQuery>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let conversation_id = conversation_id.to_string();
    let conversation = conversation_by_id(&db_pool, &conversation_id)
        .await?
        .ok_or(AppError::NotFound("conversation"))?;
    if !conversation.has_participant(&viewer.id) {
        return Err(AppError::NotFound("conversation"));
    }

    let page = store::fetch_older(&db_pool, &conversation.id, before, PAGE_SIZE).await?;
    Ok(Json(page).into_response())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn message_html(message: &Message, viewer_profile_id: &str) -> String {
    let side = if message.sender_id == viewer_profile_id { "mine" } else { "theirs" };
    include_res!(str, "/pages/message.html")
        .replace("{id}", &message.id)
        .replace("{side}", side)
        .replace("{sender_id}", &message.sender_id)
        .replace("{created_at}", &message.created_at.to_string())
        .replace("{content}", &escape(&message.content))
}
