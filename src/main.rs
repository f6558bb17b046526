use std::str::FromStr;

use axum::{debug_handler, response::{IntoResponse, Redirect, Response}, routing::get, Router};
use softspot::{auth, conversations, profiles, realtime::RealtimeHub, session, storage::MediaStore, unread::UnreadCounters, AppResult, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::services::ServeDir;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, Session, SessionManagerLayer};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(30)));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(dotenv::var("DATABASE_URL").unwrap().as_str())
        .await.unwrap();
    sqlx::migrate!().run(&db_pool).await.unwrap();

    let client_secret_path =
        dotenv::var("CLIENT_SECRET_PATH").unwrap_or("client_secret.json".to_owned());
    let client_secret = std::fs::read_to_string(&client_secret_path).unwrap();
    let clients =
        auth::Clients::from_json(serde_json::Value::from_str(&client_secret).unwrap()).unwrap();

    let media_root = dotenv::var("MEDIA_ROOT").unwrap_or("media".to_owned());

    let app_state = AppState {
        db_pool,
        clients,
        hub: RealtimeHub::new(256),
        unread: UnreadCounters::new(),
        media: MediaStore::new(&media_root),
    };

    let app = Router::new()
        .route("/", get(home))

        .merge(auth::router())
        .nest("/c", conversations::router())
        .nest("/p", profiles::router())
        .nest_service("/media", ServeDir::new(&media_root))

        .with_state(app_state)
        .layer(session_layer);

    let addr = dotenv::var("BIND_ADDR").unwrap_or("0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!("listening on {addr}");
    axum::serve(listener, app).await.unwrap();
}

#[debug_handler]
async fn home(session: Session) -> AppResult<Response> {
    if session::current_user_id(&session).await?.is_some() {
        Ok(Redirect::to("/c").into_response())
    } else {
        Ok(Redirect::to("/login").into_response())
    }
}
