use tower_sessions::Session;

use crate::{AppError, AppResult};

pub const USER_ID: &str = "user_id";
pub const CSRF_STATE: &str = "csrf_state";
pub const PKCE_VERIFIER: &str = "pkce_verifier";
pub const RETURN_URL: &str = "return_url";

/// Soft accessor: a missing session resolves to `None`, never an error.
pub async fn current_user_id(session: &Session) -> AppResult<Option<String>> {
    Ok(session.get::<String>(USER_ID).await?)
}

pub async fn require_user_id(session: &Session) -> AppResult<String> {
    current_user_id(session).await?.ok_or(AppError::Unauthenticated)
}
