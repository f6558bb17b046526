use axum::{debug_handler, extract::{Path, State}, response::{Html, IntoResponse, Redirect, Response}};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db::{self, Conversation}, include_res, profiles, res, session, unread::UnreadCounters, AppError, AppResult, AppState};

use super::{msg, read, store_page_html};

const CONVERSATION_COLUMNS: &str = "id,user1_id,user2_id,status,created_at";

pub async fn conversation_by_id(
    pool: &SqlitePool,
    conversation_id: &str,
) -> AppResult<Option<Conversation>> {
    Ok(
        sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id=?"
        ))
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?,
    )
}

/// Active conversation for the unordered pair, checking both orderings.
async fn find_active(pool: &SqlitePool, a: &str, b: &str) -> AppResult<Option<Conversation>> {
    Ok(
        sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE status='active' AND \
                   ((user1_id=? AND user2_id=?) OR (user1_id=? AND user2_id=?))"
        ))
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(pool)
        .await?,
    )
}

/// At most one active conversation per unordered profile pair; the lookup
/// checks both orderings before inserting, and an insert losing a race against
/// another first-contact resolves to the winner's row.
pub async fn find_or_create(pool: &SqlitePool, a: &str, b: &str) -> AppResult<Conversation> {
    if a == b {
        return Err("cannot open a conversation with yourself".into());
    }

    if let Some(existing) = find_active(pool, a, b).await? {
        return Ok(existing);
    }

    let conversation = Conversation {
        id: Uuid::now_v7().to_string(),
        user1_id: a.to_owned(),
        user2_id: b.to_owned(),
        status: db::STATUS_ACTIVE.to_owned(),
        created_at: db::now_millis(),
    };
    let inserted = sqlx::query(
        "INSERT INTO conversations (id,user1_id,user2_id,status,created_at) VALUES (?,?,?,?,?)",
    )
    .bind(&conversation.id)
    .bind(&conversation.user1_id)
    .bind(&conversation.user2_id)
    .bind(&conversation.status)
    .bind(conversation.created_at)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(conversation),
        Err(err) if db::is_unique_violation(&err) => find_active(pool, a, b)
            .await?
            .ok_or(AppError::Conflict("conversation already exists")),
        Err(err) => Err(err.into()),
    }
}

/// First-contact entry point: find or create the pairing, then land on it.
#[debug_handler]
pub(crate) async fn open_with(
    Path(profile_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let other = profile_id.to_string();
    if profiles::profile_by_id(&db_pool, &other).await?.is_none() {
        return Ok(res::sorry("profile"));
    }

    let conversation = find_or_create(&db_pool, &viewer.id, &other).await?;
    Ok(Redirect::to(&format!("/c/{}", conversation.id)).into_response())
}

/// Conversation view. Loads the initial page and marks inbound messages read
/// before the page's socket subscribes, so read marking always operates on
/// materialized rows.
#[debug_handler(state = AppState)]
pub(crate) async fn conversation_page(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(unread): State<UnreadCounters>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let conversation_id = conversation_id.to_string();
    let Some(conversation) = conversation_by_id(&db_pool, &conversation_id).await? else {
        return Ok(res::sorry("conversation"));
    };
    if !conversation.has_participant(&viewer.id) {
        return Ok(res::sorry("conversation"));
    }

    let counterpart_id = conversation
        .counterpart_of(&viewer.id)
        .ok_or(AppError::NotFound("conversation"))?
        .to_owned();
    let counterpart = profiles::profile_by_id(&db_pool, &counterpart_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let page = crate::store::fetch_initial(&db_pool, &conversation.id, msg::PAGE_SIZE).await?;
    read::mark_inbound_as_read(&db_pool, &unread, &conversation.id, &viewer.id).await?;

    let body = include_res!(str, "/pages/conversation.html")
        .replace("{conversation_id}", &conversation.id)
        .replace("{status}", &conversation.status)
        .replace("{counterpart_name}", &counterpart.full_name)
        .replace("{counterpart_id}", &counterpart.id)
        .replace("{viewer_id}", &viewer.id)
        .replace("{messages}", &store_page_html(&page, &viewer.id));

    Ok(Html(body).into_response())
}

/// Status flip `active -> closed`; conversations are never deleted. The
/// closed conversation's still-unread inbound messages leave both
/// participants' unread counts, since those only span active conversations.
/// Returns false when the row was already closed (nothing flipped, nothing
/// settled, so a repeated close cannot double-decrement).
pub async fn close(
    pool: &SqlitePool,
    counters: &UnreadCounters,
    conversation: &Conversation,
) -> AppResult<bool> {
    let flipped =
        sqlx::query("UPDATE conversations SET status='closed' WHERE id=? AND status='active'")
            .bind(&conversation.id)
            .execute(pool)
            .await?
            .rows_affected();
    if flipped == 0 {
        return Ok(false);
    }

    for participant in [&conversation.user1_id, &conversation.user2_id] {
        let (unread,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id=? AND sender_id<>? AND read_at IS NULL",
        )
        .bind(&conversation.id)
        .bind(participant)
        .fetch_one(pool)
        .await?;
        counters.note_conversation_closed(participant, unread);
    }
    Ok(true)
}

/// Close endpoint; allowed for a participant or for moderator/admin roles.
#[debug_handler(state = AppState)]
pub(crate) async fn close_conversation(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(unread): State<UnreadCounters>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let viewer = profiles::profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    let conversation_id = conversation_id.to_string();
    let Some(conversation) = conversation_by_id(&db_pool, &conversation_id).await? else {
        return Ok(res::sorry("conversation"));
    };
    if !conversation.has_participant(&viewer.id) && !viewer.is_staff() {
        return Ok(res::sorry("conversation"));
    }

    close(&db_pool, &unread, &conversation).await?;
    Ok(Redirect::to("/c").into_response())
}
