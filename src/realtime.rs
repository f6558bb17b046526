use std::time::Duration;

use tokio::sync::broadcast;

use crate::db::Message;

/// Consecutive transport errors tolerated before a channel gives up; the
/// error after the last retry fails the channel for good.
pub const RETRY_BUDGET: u32 = 2;
pub const RETRY_DELAY_MS: u64 = 250;

#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    MessageInserted(Message),
}

/// What a subscribed channel yields: a delivered insert, or notice that the
/// receiver fell behind the hub and events were dropped (the subscription
/// itself is still live; the caller catches up from the rows).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Message(Message),
    Lagged,
}

/// Process-wide fan-out for row-insert notifications. Initialized once at
/// startup and shared by reference through `AppState`.
#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self { tx: broadcast::channel(capacity).0 }
    }

    pub fn publish_insert(&self, message: Message) {
        // nobody listening is fine
        let _ = self.tx.send(RealtimeEvent::MessageInserted(message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Subscribing,
    Subscribed,
    Retrying { attempt: u32 },
    Failed,
}

/// Per-conversation subscription over the hub.
///
/// `Disconnected -> Subscribing -> Subscribed`, transport errors bounce
/// through `Retrying` back to `Subscribing` until the budget runs out, after
/// which the channel stays `Failed` until the caller rebuilds it. Each
/// subscribe takes a fresh receiver, so handlers from earlier subscriptions
/// can never accumulate.
pub struct ConversationChannel {
    conversation_id: String,
    state: ChannelState,
    attempts: u32,
    rx: Option<broadcast::Receiver<RealtimeEvent>>,
}

impl ConversationChannel {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: ChannelState::Disconnected,
            attempts: 0,
            rx: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state == ChannelState::Failed
    }

    pub fn subscribe(&mut self, hub: &RealtimeHub) {
        if self.is_failed() {
            return;
        }
        self.rx = None;
        self.state = ChannelState::Subscribing;
        self.rx = Some(hub.subscribe());
        self.state = ChannelState::Subscribed;
    }

    /// Records a transport error. Returns true while another subscribe is
    /// still within the retry budget; false once the channel has failed for
    /// good (the transition to `Failed` happens exactly once). The attempt
    /// count is consecutive: it only resets when an event actually arrives,
    /// not on the resubscribe itself.
    pub fn on_transport_error(&mut self) -> bool {
        self.rx = None;
        if self.state == ChannelState::Failed {
            return false;
        }
        self.attempts += 1;
        if self.attempts > RETRY_BUDGET {
            self.state = ChannelState::Failed;
            false
        } else {
            self.state = ChannelState::Retrying { attempt: self.attempts };
            true
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(RETRY_DELAY_MS * self.attempts.max(1) as u64)
    }

    pub fn teardown(&mut self) {
        self.rx = None;
        self.attempts = 0;
        self.state = ChannelState::Disconnected;
    }

    /// Next insert for this conversation. Events for any other conversation
    /// are dropped here even though publishers already tag them, so a
    /// mis-routed event can never cross into the wrong view.
    ///
    /// A lagged receiver is not a transport error: it stays subscribed and
    /// is reported as `ChannelSignal::Lagged` so the caller can backfill the
    /// overrun from the rows. Only `Closed` reaches the retry budget.
    pub async fn recv(&mut self) -> Result<ChannelSignal, broadcast::error::RecvError> {
        loop {
            let event = match self.rx.as_mut() {
                Some(rx) => match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("channel fell behind, {skipped} events dropped");
                        return Ok(ChannelSignal::Lagged);
                    }
                    Err(err) => return Err(err),
                },
                None => return Err(broadcast::error::RecvError::Closed),
            };
            match event {
                RealtimeEvent::MessageInserted(m) if m.conversation_id == self.conversation_id => {
                    self.attempts = 0;
                    return Ok(ChannelSignal::Message(m));
                }
                RealtimeEvent::MessageInserted(_) => continue,
            }
        }
    }
}
