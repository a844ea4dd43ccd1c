use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_rest::ChatApi;
use parley_transport::RealtimeLink;

use crate::controller::ConversationController;

/// Best-effort propagation of the local user's read state.
///
/// Local state always updates; the server sync goes over the realtime link
/// when it is up, over REST otherwise, and failures are logged rather than
/// surfaced since stale remote read state is not worth interrupting the
/// user for.
pub struct ReadReceipts {
    api: Arc<dyn ChatApi>,
    link: Arc<dyn RealtimeLink>,
    bus: Arc<dyn EventBus>,
    conversation: Arc<ConversationController>,
    self_user_id: String,
}

impl ReadReceipts {
    pub fn new(
        api: Arc<dyn ChatApi>,
        link: Arc<dyn RealtimeLink>,
        bus: Arc<dyn EventBus>,
        conversation: Arc<ConversationController>,
        self_user_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            link,
            bus,
            conversation,
            self_user_id: self_user_id.into(),
        })
    }

    /// Marks a chat read. Displayed messages are flagged locally only when
    /// the named chat is the open one; the announcement and the server
    /// sync happen unconditionally so the chat list's unread count is
    /// zeroed even when nothing on screen needed flagging.
    pub async fn mark_chat_read(&self, chat_id: &str) {
        let marked = if self.conversation.open_chat_id().as_deref() == Some(chat_id) {
            self.conversation.mark_displayed_read()
        } else {
            Vec::new()
        };
        debug!(chat_id, count = marked.len(), "marking chat read");

        self.notify(
            "chat.read.acknowledged",
            EventPayload::MessagesRead {
                chat_id: chat_id.to_string(),
                user_id: self.self_user_id.clone(),
                message_ids: marked,
            },
        );

        if self.link.is_connected() {
            self.link.mark_read(chat_id);
        } else if let Err(e) = self.api.mark_read(chat_id).await {
            warn!(chat_id, error = %e, "failed to sync read state, continuing");
        }
    }

    fn notify(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self.bus.publish(Event::new(
            channel,
            EventSource::System("messages".into()),
            payload,
        ));
    }
}
