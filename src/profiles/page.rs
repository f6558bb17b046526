use axum::{debug_handler, extract::{Path, State}, response::{Html, IntoResponse, Redirect, Response}};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{include_res, res, session, AppError, AppResult};

use super::{profile_by_id, profile_for_user};

#[debug_handler]
pub(crate) async fn my_profile(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let profile = profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    Ok(Redirect::to(&format!("/p/{}", profile.id)).into_response())
}

#[debug_handler]
pub(crate) async fn profile(
    Path(profile_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Response> {
    if session::current_user_id(&session).await?.is_none() {
        return Err(AppError::Unauthenticated);
    }

    let Some(profile) = profile_by_id(&db_pool, &profile_id.to_string()).await? else {
        return Ok(res::sorry("profile"));
    };

    Ok(Html(
        include_res!(str, "/pages/profile.html")
            .replace("{full_name}", &profile.full_name)
            .replace("{username}", &profile.username)
            .replace("{avatar_url}", &profile.avatar_url)
            .replace("{profile_id}", &profile.id),
    )
    .into_response())
}
