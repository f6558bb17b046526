use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{profiles, session, unread::UnreadCounters, AppResult, AppState};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

/// SIGNED_OUT: clears the session and any counter state held for the
/// identity.
#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(db_pool): State<SqlitePool>,
    State(unread): State<UnreadCounters>,
    session: Session,
) -> AppResult<Redirect> {
    if let Some(user_id) = session::current_user_id(&session).await? {
        if let Some(profile) = profiles::profile_for_user(&db_pool, &user_id).await? {
            unread.clear(&profile.id);
        }
    }
    session.clear().await;
    Ok(Redirect::to(return_url.unwrap_or("/".to_string()).as_str()))
}
