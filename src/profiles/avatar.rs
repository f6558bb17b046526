use axum::{body::Bytes, debug_handler, extract::State, response::{IntoResponse, Redirect, Response}};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{session, storage::MediaStore, AppError, AppResult, AppState};

use super::profile_for_user;

#[debug_handler(state = AppState)]
pub(crate) async fn upload_avatar(
    State(db_pool): State<SqlitePool>,
    State(media): State<MediaStore>,
    session: Session,
    body: Bytes,
) -> AppResult<Response> {
    let user_id = session::require_user_id(&session).await?;
    let profile = profile_for_user(&db_pool, &user_id)
        .await?
        .ok_or(AppError::NotFound("profile"))?;

    if body.is_empty() {
        return Err("empty avatar upload".into());
    }

    let url = media
        .upload("avatars", &format!("{}.png", profile.id), &body)
        .await?;

    sqlx::query("UPDATE profiles SET avatar_url=? WHERE id=?")
        .bind(&url)
        .bind(&profile.id)
        .execute(&db_pool)
        .await?;

    Ok(Redirect::to(&format!("/p/{}", profile.id)).into_response())
}
