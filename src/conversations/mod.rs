mod list;
mod msg;
mod open;
mod read;
mod ws;

use axum::{routing::{get, post}, Router};

pub use list::{list_conversations, ConversationEntry};
pub use msg::{send_message, SendOutcome, PAGE_SIZE};
pub use open::{close, conversation_by_id, find_or_create};
pub use read::mark_inbound_as_read;

use crate::{db::Message, AppState};

pub(crate) fn store_page_html(page: &[Message], viewer_profile_id: &str) -> String {
    let mut html = String::new();
    for message in page {
        html += &msg::message_html(message, viewer_profile_id);
    }
    html
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list::conversations_page))
        .route("/unread", get(list::unread_count))
        .route("/open/{profile_id}", post(open::open_with))
        .route("/{uuid}", get(open::conversation_page))
        .route("/{uuid}/older", get(msg::older))
        .route("/{uuid}/close", post(open::close_conversation))
        .route("/{uuid}/ws", get(ws::conversation_ws))
}
