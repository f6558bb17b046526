mod avatar;
mod page;

use axum::{routing::{get, post}, Router};
use rand::seq::IndexedRandom;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db::{self, Profile}, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(page::my_profile))
        .route("/avatar", post(avatar::upload_avatar))
        .route("/{uuid}", get(page::profile))
}

const PROFILE_COLUMNS: &str =
    "id,user_id,full_name,username,avatar_url,role,visibility,created_at";

pub async fn profile_for_user(pool: &SqlitePool, user_id: &str) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id=?"))
            .bind(user_id)
            .fetch_optional(pool)
            .await?,
    )
}

pub async fn profile_by_id(pool: &SqlitePool, profile_id: &str) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as(&format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id=?"))
            .bind(profile_id)
            .fetch_optional(pool)
            .await?,
    )
}

fn random_alias() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
        "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
    ];

    let nouns = [
        "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
        "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
        "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
    ];

    format!(
        "{} {}",
        adjectives.choose(&mut rand::rng()).unwrap(),
        nouns.choose(&mut rand::rng()).unwrap()
    )
}

/// Resolves the profile mapped to an identity, creating it with defaults on
/// first sight. Idempotent under races: the UNIQUE constraint on
/// `profiles.user_id` is the source of truth, and a create that loses the
/// race re-selects the winner's row instead of erroring.
pub async fn get_or_create_profile(
    pool: &SqlitePool,
    user_id: &str,
    email: Option<&str>,
) -> AppResult<Profile> {
    if let Some(profile) = profile_for_user(pool, user_id).await? {
        return Ok(profile);
    }

    let id = Uuid::now_v7();
    let username = "user".to_owned() + &id.simple().to_string();
    let full_name = email
        .and_then(|e| e.split('@').next())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(random_alias);
    let profile = Profile {
        id: id.to_string(),
        user_id: user_id.to_owned(),
        full_name,
        username,
        avatar_url: "/media/avatars/placeholder.png".to_owned(),
        role: db::ROLE_MEMBER.to_owned(),
        visibility: "visible".to_owned(),
        created_at: db::now_millis(),
    };

    tracing::info!("adding @{}, {}", profile.username, profile.full_name);
    let inserted = sqlx::query(
        "INSERT INTO profiles (id,user_id,full_name,username,avatar_url,role,visibility,created_at) \
         VALUES (?,?,?,?,?,?,?,?)",
    )
    .bind(&profile.id)
    .bind(&profile.user_id)
    .bind(&profile.full_name)
    .bind(&profile.username)
    .bind(&profile.avatar_url)
    .bind(&profile.role)
    .bind(&profile.visibility)
    .bind(profile.created_at)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => Ok(profile),
        Err(err) if db::is_unique_violation(&err) => {
            // lost the race; the existing row wins
            profile_for_user(pool, user_id)
                .await?
                .ok_or(AppError::Conflict("profile already exists"))
        }
        Err(err) => Err(err.into()),
    }
}
