use axum::{debug_handler, extract::{ws::{Message as WsMessage, WebSocket}, Path, State, WebSocketUpgrade}, response::Response};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db::{self, Conversation, Message, Profile}, profiles, realtime::{ChannelSignal, ConversationChannel, RealtimeHub}, session, store::{self, MessageStore}, unread::UnreadCounters, AppError, AppResult, AppState};

use super::{msg::{self, SendMessageQuery, SendOutcome}, open::conversation_by_id, read};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Frame<'a> {
    Message { message: &'a Message },
    ConnectionError { retriable: bool },
    SendRejected { reason: &'a str },
}

/// One socket per open conversation view. Closing the socket (navigation,
/// conversation switch, tab close) tears the subscription down, so handlers
/// never accumulate across views.
#[debug_handler(state = AppState)]
pub(crate) async fn conversation_ws(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<RealtimeHub>,
    State(unread): State<UnreadCounters>,
    session: Session,

    ws: WebSocketUpgrade,
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

    Ok(ws.on_upgrade(async move |stream| {
        if let Err(err) = drive(stream, db_pool, hub, unread, conversation, viewer).await {
            tracing::warn!("conversation socket closed: {err:?}");
        }
    }))
}

/// Selection order matters: fresh store, initial page, read marking, then
/// subscribe. Marking before the load would operate on an empty set, and
/// subscribing earlier could deliver an event the initial fetch also carries;
/// the store's id de-duplication covers that remaining race.
async fn drive(
    stream: WebSocket,
    db_pool: SqlitePool,
    hub: RealtimeHub,
    unread: UnreadCounters,
    conversation: Conversation,
    viewer: Profile,
) -> AppResult<()> {
    let (mut sender, mut receiver) = stream.split();

    let mut message_store = MessageStore::new(&conversation.id);
    let page = store::fetch_initial(&db_pool, &conversation.id, msg::PAGE_SIZE).await?;
    message_store.replace_initial(&conversation.id, page);
    let transitioned =
        read::mark_inbound_as_read(&db_pool, &unread, &conversation.id, &viewer.id).await?;
    if transitioned > 0 {
        message_store.mark_inbound_read(&viewer.id, db::now_millis());
    }

    let mut channel = ConversationChannel::new(&conversation.id);
    channel.subscribe(&hub);

    for message in message_store.messages() {
        send_frame(&mut sender, &Frame::Message { message }).await?;
    }

    loop {
        tokio::select! {
            event = channel.recv() => match event {
                Ok(ChannelSignal::Message(mut message)) => {
                    if !message_store.append(message.clone()) {
                        continue;
                    }
                    if message.sender_id != viewer.id {
                        // the view is open, so the new row is read right away;
                        // the mirror and the outgoing frame must say so too
                        read::mark_inbound_as_read(&db_pool, &unread, &conversation.id, &viewer.id).await?;
                        let read_at = db::now_millis();
                        message_store.mark_inbound_read(&viewer.id, read_at);
                        message.read_at = Some(read_at);
                    }
                    send_frame(&mut sender, &Frame::Message { message: &message }).await?;
                }
                Ok(ChannelSignal::Lagged) => {
                    // the hub dropped events for this receiver; close the gap
                    // from the rows (inclusive fetch, the store de-dups)
                    let after = message_store.newest_created_at().unwrap_or(0);
                    let missed = store::fetch_newer(&db_pool, &conversation.id, after).await?;
                    let mut caught_inbound = false;
                    for mut message in missed {
                        if !message_store.append(message.clone()) {
                            continue;
                        }
                        if message.sender_id != viewer.id {
                            caught_inbound = true;
                            message.read_at = Some(db::now_millis());
                        }
                        send_frame(&mut sender, &Frame::Message { message: &message }).await?;
                    }
                    if caught_inbound {
                        read::mark_inbound_as_read(&db_pool, &unread, &conversation.id, &viewer.id).await?;
                        message_store.mark_inbound_read(&viewer.id, db::now_millis());
                    }
                }
                Err(_) => {
                    if channel.on_transport_error() {
                        tokio::time::sleep(channel.retry_delay()).await;
                        channel.subscribe(&hub);
                    } else {
                        // surfaced once; the client offers a manual retry
                        let _ = send_frame(&mut sender, &Frame::ConnectionError { retriable: true }).await;
                        break;
                    }
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(ws_msg)) => {
                    let Ok(query) = serde_json::from_slice::<SendMessageQuery>(&ws_msg.into_data()) else {
                        continue;
                    };
                    let media_type = query.media_type.as_deref().unwrap_or(db::MEDIA_TEXT).to_owned();
                    match msg::send_message(
                        &db_pool,
                        &hub,
                        &unread,
                        &conversation,
                        &viewer.id,
                        &query.content,
                        &media_type,
                    )
                    .await
                    {
                        Ok(SendOutcome::Sent(_)) | Ok(SendOutcome::Ignored) => {}
                        Err(AppError::Conflict(reason)) => {
                            send_frame(&mut sender, &Frame::SendRejected { reason }).await?;
                        }
                        Err(err) => {
                            tracing::error!("send failed: {err:?}");
                            send_frame(&mut sender, &Frame::SendRejected { reason: "could not send, try again" }).await?;
                        }
                    }
                }
                _ => break,
            },
        }
    }

    channel.teardown();
    Ok(())
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    frame: &Frame<'_>,
) -> AppResult<()> {
    let text = serde_json::to_string(frame)?;
    sender.send(WsMessage::Text(text.into())).await?;
    Ok(())
}
