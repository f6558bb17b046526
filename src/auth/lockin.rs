use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect}};
use oauth2::{reqwest, AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{profiles, session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, USER_ID}, unread::UnreadCounters, AppResult, AppState};

use super::{clients::ClientProvider, Clients};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// OAuth callback: the SIGNED_IN moment. Re-runs profile resolution and
/// reconciles the unread counter before handing the session back.
#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(clients): State<Clients>,
    State(unread): State<UnreadCounters>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);

    let Some(stored_state) = session.get::<String>(CSRF_STATE).await? else {
        return Err("no csrf_state")?;
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err("csrf tokens don't match")?;
    }

    let Some(pkce_verifier) = session.get::<String>(PKCE_VERIFIER).await? else {
        return Err("no pkce_verifier")?;
    };

    let client = clients.get_client(provider)?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let access_token = token_result.access_token().secret();
    let body: Value = http_client
        .get(provider.userinfo_uri())
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, "softspot")
        .send()
        .await?
        .json()
        .await?;

    let provider_uid = match body.get("id").ok_or("expected id in userinfo")? {
        Value::String(s) => s.clone(),
        v => v.to_string(),
    };
    let user_id = format!("{}:{provider_uid}", provider.id());
    let email = body.get("email").and_then(Value::as_str);

    session.insert(USER_ID, user_id.clone()).await?;

    let profile = profiles::get_or_create_profile(&db_pool, &user_id, email).await?;
    unread.reconcile(&db_pool, &profile.id).await?;

    tracing::info!("welcome @{}", profile.username);

    let return_url: String = session
        .get(RETURN_URL)
        .await?
        .unwrap_or("/c".to_string());
    Ok(Redirect::to(return_url.as_str()))
}
