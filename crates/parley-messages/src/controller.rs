use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_core::model::{ChatMessage, DeliveryState};
use parley_rest::ChatApi;
use parley_transport::RealtimeLink;

use crate::error::ConversationError;

#[derive(Default)]
struct ConversationState {
    open_chat: Option<String>,
    /// Oldest-first; the server hands out newest-first pages which are
    /// reversed on arrival.
    messages: Vec<ChatMessage>,
    current_page: u32,
    total_pages: u32,
    loading_older: bool,
}

/// The message history of the currently open chat.
///
/// Owns backward pagination and the reconciliation of optimistic local
/// entries against their server echoes. Exactly one chat is open at a
/// time; switching chats leaves the old realtime room before joining the
/// new one.
pub struct ConversationController {
    api: Arc<dyn ChatApi>,
    link: Arc<dyn RealtimeLink>,
    bus: Arc<dyn EventBus>,
    self_user_id: String,
    page_size: u32,
    state: Mutex<ConversationState>,
}

impl ConversationController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        link: Arc<dyn RealtimeLink>,
        bus: Arc<dyn EventBus>,
        self_user_id: impl Into<String>,
        page_size: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            link,
            bus,
            self_user_id: self_user_id.into(),
            page_size,
            state: Mutex::new(ConversationState::default()),
        })
    }

    /// Switches the open conversation and loads its newest page. The old
    /// room is left before the new one is joined, so realtime traffic for
    /// the previous chat stops immediately.
    pub async fn open_chat(&self, chat_id: &str) -> Result<(), ConversationError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if let Some(previous) = state.open_chat.take() {
                if previous != chat_id {
                    self.link.leave_chat(&previous);
                }
            }
            state.messages.clear();
            state.current_page = 0;
            state.total_pages = 0;
            state.open_chat = Some(chat_id.to_string());
        }
        self.link.join_chat(chat_id);
        self.notify(
            "ui.chat.opened",
            EventPayload::ChatOpened {
                chat_id: chat_id.to_string(),
            },
        );
        self.load_page(chat_id, 1).await
    }

    pub fn close_chat(&self) {
        let chat_id = {
            let mut state = self.state.lock().expect("lock poisoned");
            let Some(chat_id) = state.open_chat.take() else {
                return;
            };
            state.messages.clear();
            state.current_page = 0;
            state.total_pages = 0;
            chat_id
        };
        self.link.leave_chat(&chat_id);
        self.notify("ui.chat.closed", EventPayload::ChatClosed { chat_id });
    }

    /// Loads the next older history page, prepending it. A no-op while a
    /// page is in flight or when the history is exhausted.
    pub async fn load_older_messages(&self) -> Result<(), ConversationError> {
        let (chat_id, next_page) = {
            let mut state = self.state.lock().expect("lock poisoned");
            let Some(chat_id) = state.open_chat.clone() else {
                return Ok(());
            };
            if state.loading_older || state.current_page >= state.total_pages {
                return Ok(());
            }
            state.loading_older = true;
            (chat_id, state.current_page + 1)
        };

        let result = self.load_page(&chat_id, next_page).await;
        self.state.lock().expect("lock poisoned").loading_older = false;
        result
    }

    async fn load_page(&self, chat_id: &str, page: u32) -> Result<(), ConversationError> {
        let fetched = self.api.list_messages(chat_id, page, self.page_size).await?;

        let mut state = self.state.lock().expect("lock poisoned");
        if state.open_chat.as_deref() != Some(chat_id) {
            debug!(chat_id, page, "discarding history page for chat no longer open");
            return Ok(());
        }

        let mut batch = fetched.messages;
        batch.reverse();
        if page <= 1 {
            state.messages = batch;
        } else {
            // Prepend the older page; anything already present (an echo
            // that raced the fetch) is skipped.
            batch.retain(|m| !state.messages.iter().any(|e| e.id == m.id));
            let newer = std::mem::take(&mut state.messages);
            batch.extend(newer);
            state.messages = batch;
        }
        state.current_page = fetched.current_page;
        state.total_pages = fetched.total_pages;
        debug!(
            chat_id,
            page = state.current_page,
            total_pages = state.total_pages,
            messages = state.messages.len(),
            "history page loaded"
        );
        Ok(())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().expect("lock poisoned").messages.clone()
    }

    pub fn open_chat_id(&self) -> Option<String> {
        self.state.lock().expect("lock poisoned").open_chat.clone()
    }

    pub fn has_older_messages(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.current_page < state.total_pages
    }

    /// Appends the optimistic entry for a realtime send.
    pub fn insert_provisional(&self, message: ChatMessage) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.open_chat.as_deref() != Some(message.chat_id.as_str()) {
            return;
        }
        state.messages.push(message);
    }

    /// Folds a server-confirmed own message in: replaces the matching
    /// provisional entry if one exists, appends otherwise.
    pub fn confirm_send(&self, message: ChatMessage) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.open_chat.as_deref() != Some(message.chat_id.as_str()) {
            return;
        }
        if !Self::reconcile(&mut state, &message)
            && !state.messages.iter().any(|m| m.id == message.id)
        {
            state.messages.push(message);
        }
    }

    /// Marks every unread message from other participants read locally and
    /// returns their ids.
    pub fn mark_displayed_read(&self) -> Vec<String> {
        let mut state = self.state.lock().expect("lock poisoned");
        let mut marked = Vec::new();
        for message in &mut state.messages {
            if message.sender_id != self.self_user_id && !message.is_read {
                message.is_read = true;
                if !message.read_by.contains(&self.self_user_id) {
                    message.read_by.push(self.self_user_id.clone());
                }
                marked.push(message.id.clone());
            }
        }
        marked
    }

    fn record_received(&self, chat_id: &str, message: &ChatMessage) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.open_chat.as_deref() != Some(chat_id) {
            return;
        }
        // An echo we already reconciled, or a redelivered frame.
        if state.messages.iter().any(|m| m.id == message.id) {
            debug!(message_id = %message.id, "dropping duplicate inbound message");
            return;
        }
        if Self::reconcile(&mut state, message) {
            return;
        }
        state.messages.push(message.clone());
    }

    /// Replaces the provisional entry matching an echoed message, in
    /// place, preserving list position. Correlation id first; a content
    /// match on pending own messages covers servers that do not echo the
    /// reference.
    fn reconcile(state: &mut ConversationState, incoming: &ChatMessage) -> bool {
        let position = incoming
            .client_ref
            .as_deref()
            .and_then(|client_ref| {
                state
                    .messages
                    .iter()
                    .position(|m| m.is_provisional() && m.client_ref.as_deref() == Some(client_ref))
            })
            .or_else(|| {
                state.messages.iter().position(|m| {
                    m.delivery == DeliveryState::Pending
                        && m.sender_id == incoming.sender_id
                        && m.content == incoming.content
                })
            });

        match position {
            Some(index) => {
                debug!(
                    provisional_id = %state.messages[index].id,
                    confirmed_id = %incoming.id,
                    "reconciled optimistic send"
                );
                let mut confirmed = incoming.clone();
                confirmed.delivery = DeliveryState::Confirmed;
                state.messages[index] = confirmed;
                true
            }
            None => false,
        }
    }

    fn apply_read_receipt(&self, chat_id: &str, user_id: &str, message_ids: &[String]) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.open_chat.as_deref() != Some(chat_id) {
            return;
        }
        for message in &mut state.messages {
            if message_ids.iter().any(|id| *id == message.id) {
                message.is_read = true;
                if !message.read_by.iter().any(|u| u == user_id) {
                    message.read_by.push(user_id.to_string());
                }
            }
        }
    }

    /// Connection loss means pending echoes will never arrive; surface
    /// those sends as failed so the user can retry.
    fn fail_pending_sends(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        for message in &mut state.messages {
            if message.delivery == DeliveryState::Pending {
                warn!(message_id = %message.id, "connection lost with send in flight, marking failed");
                message.delivery = DeliveryState::Failed;
            }
        }
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::MessageReceived { chat_id, message } => {
                self.record_received(chat_id, message);
            }
            EventPayload::MessagesRead {
                chat_id,
                user_id,
                message_ids,
            } => {
                self.apply_read_receipt(chat_id, user_id, message_ids);
            }
            EventPayload::ChatDeleted { chat_id } => {
                let closed = {
                    let mut state = self.state.lock().expect("lock poisoned");
                    if state.open_chat.as_deref() == Some(chat_id) {
                        state.open_chat = None;
                        state.messages.clear();
                        state.current_page = 0;
                        state.total_pages = 0;
                        true
                    } else {
                        false
                    }
                };
                if closed {
                    self.notify(
                        "ui.chat.closed",
                        EventPayload::ChatClosed {
                            chat_id: chat_id.clone(),
                        },
                    );
                }
            }
            EventPayload::ConnectionLost { .. } => {
                self.fail_pending_sends();
            }
            _ => {}
        }
    }

    /// Subscribes and returns the event loop future. The subscription is
    /// live before this returns, so events published after the call are
    /// seen even if the future is polled later.
    pub fn run(
        self: Arc<Self>,
    ) -> Result<impl std::future::Future<Output = Result<(), ConversationError>>, ConversationError>
    {
        let mut sub = self
            .bus
            .subscribe("{system,chat}.**")
            .map_err(|e| ConversationError::EventBus(e.to_string()))?;

        Ok(async move {
            loop {
                match sub.recv().await {
                    Ok(event) => self.handle_event(&event),
                    Err(parley_core::error::EventBusError::ChannelClosed) => {
                        debug!("event bus closed, conversation controller stopping");
                        return Ok(());
                    }
                    Err(parley_core::error::EventBusError::Lagged(count)) => {
                        warn!(count, "conversation controller lagged, some events dropped");
                    }
                    Err(e) => {
                        error!(error = %e, "conversation controller subscription error");
                        return Err(ConversationError::EventBus(e.to_string()));
                    }
                }
            }
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{confirmed_message, mock_api, provisional, FakeLink, MockApi};
    use parley_core::event::BroadcastEventBus;
    use parley_core::model::MessageType;
    use parley_rest::MessagePage;

    fn controller_with(
        api: MockApi,
    ) -> (Arc<ConversationController>, Arc<FakeLink>, Arc<BroadcastEventBus>) {
        let link = Arc::new(FakeLink::new(true));
        let link_dyn: Arc<dyn RealtimeLink> = link.clone();
        let bus = Arc::new(BroadcastEventBus::default());
        let events: Arc<dyn EventBus> = bus.clone();
        let controller = ConversationController::new(Arc::new(api), link_dyn, events, "user-1", 50);
        (controller, link, bus)
    }

    fn page(ids: &[&str], current_page: u32, total_pages: u32) -> MessagePage {
        MessagePage {
            // Server order: newest first.
            messages: ids
                .iter()
                .map(|id| confirmed_message(id, "chat-1", "user-2", &format!("body-{id}")))
                .collect(),
            current_page,
            total_pages,
        }
    }

    #[tokio::test]
    async fn opening_a_chat_loads_newest_page_oldest_first() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&["m3", "m2", "m1"], 1, 3)));
        let (controller, link, _bus) = controller_with(api);

        controller.open_chat("chat-1").await.unwrap();

        let ids: Vec<String> = controller.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert!(controller.has_older_messages());
        assert_eq!(link.joined(), vec!["chat-1"]);
    }

    #[tokio::test]
    async fn switching_chats_leaves_old_room_first() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&[], 1, 1)));
        let (controller, link, _bus) = controller_with(api);

        controller.open_chat("chat-1").await.unwrap();
        controller.open_chat("chat-2").await.unwrap();

        assert_eq!(link.left(), vec!["chat-1"]);
        assert_eq!(link.joined(), vec!["chat-1", "chat-2"]);
        assert_eq!(controller.open_chat_id().as_deref(), Some("chat-2"));
    }

    #[tokio::test]
    async fn older_pages_prepend_without_duplicates() {
        let mut api = mock_api();
        api.expect_list_messages().returning(|_, page_no, _| {
            Ok(match page_no {
                1 => page(&["m4", "m3"], 1, 2),
                // Overlap: m3 appears on both pages.
                _ => page(&["m3", "m2", "m1"], 2, 2),
            })
        });
        let (controller, _link, _bus) = controller_with(api);

        controller.open_chat("chat-1").await.unwrap();
        controller.load_older_messages().await.unwrap();

        let ids: Vec<String> = controller.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
        assert!(!controller.has_older_messages());
    }

    #[tokio::test]
    async fn load_older_is_a_noop_when_history_exhausted() {
        let mut api = mock_api();
        api.expect_list_messages()
            .times(1)
            .returning(|_, _, _| Ok(page(&["m1"], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);

        controller.open_chat("chat-1").await.unwrap();
        controller.load_older_messages().await.unwrap();

        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn echo_with_client_ref_replaces_provisional_in_place() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&["m1"], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        controller.insert_provisional(provisional("chat-1", "user-1", "hello", "ref-1"));

        let mut echo = confirmed_message("msg-9", "chat-1", "user-1", "hello");
        echo.client_ref = Some("ref-1".into());
        controller.record_received("chat-1", &echo);

        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, "msg-9");
        assert_eq!(messages[1].delivery, DeliveryState::Confirmed);
        assert!(!messages.iter().any(|m| m.is_provisional()));
    }

    #[tokio::test]
    async fn echo_without_client_ref_falls_back_to_content_match() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&[], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        controller.insert_provisional(provisional("chat-1", "user-1", "hello", "ref-1"));
        let echo = confirmed_message("msg-9", "chat-1", "user-1", "hello");
        controller.record_received("chat-1", &echo);

        let messages = controller.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "msg-9");
    }

    #[tokio::test]
    async fn redelivered_echo_is_dropped() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&[], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        controller.insert_provisional(provisional("chat-1", "user-1", "hello", "ref-1"));
        let mut echo = confirmed_message("msg-9", "chat-1", "user-1", "hello");
        echo.client_ref = Some("ref-1".into());
        controller.record_received("chat-1", &echo);
        controller.record_received("chat-1", &echo);

        assert_eq!(controller.messages().len(), 1);
    }

    #[tokio::test]
    async fn message_for_other_chat_is_ignored() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&[], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        let stray = confirmed_message("msg-9", "chat-2", "user-2", "hello");
        controller.record_received("chat-2", &stray);

        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn connection_loss_fails_pending_sends() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&[], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();
        controller.insert_provisional(provisional("chat-1", "user-1", "hello", "ref-1"));

        let event = Event::new(
            Channel::new("system.connection.lost").unwrap(),
            EventSource::Socket,
            EventPayload::ConnectionLost {
                reason: "gone".into(),
                will_retry: true,
            },
        );
        controller.handle_event(&event);

        assert_eq!(controller.messages()[0].delivery, DeliveryState::Failed);
    }

    #[tokio::test]
    async fn read_receipt_marks_listed_messages() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&["m2", "m1"], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        controller.apply_read_receipt("chat-1", "user-2", &["m1".to_string()]);

        let messages = controller.messages();
        let m1 = messages.iter().find(|m| m.id == "m1").unwrap();
        assert!(m1.is_read);
        assert_eq!(m1.read_by, vec!["user-2"]);
        let m2 = messages.iter().find(|m| m.id == "m2").unwrap();
        assert!(!m2.is_read);
    }

    #[tokio::test]
    async fn mark_displayed_read_reports_only_unread_peer_messages() {
        let mut api = mock_api();
        api.expect_list_messages().returning(|_, _, _| {
            let mut own = confirmed_message("mine", "chat-1", "user-1", "mine");
            own.is_read = false;
            let mut seen = confirmed_message("seen", "chat-1", "user-2", "seen");
            seen.is_read = true;
            let unseen = confirmed_message("unseen", "chat-1", "user-2", "unseen");
            Ok(MessagePage {
                messages: vec![unseen, seen, own],
                current_page: 1,
                total_pages: 1,
            })
        });
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        let marked = controller.mark_displayed_read();

        assert_eq!(marked, vec!["unseen"]);
        let messages = controller.messages();
        assert!(messages.iter().find(|m| m.id == "unseen").unwrap().is_read);
    }

    #[tokio::test]
    async fn deleting_the_open_chat_closes_it() {
        let mut api = mock_api();
        api.expect_list_messages()
            .returning(|_, _, _| Ok(page(&["m1"], 1, 1)));
        let (controller, _link, _bus) = controller_with(api);
        controller.open_chat("chat-1").await.unwrap();

        let event = Event::new(
            Channel::new("chat.deleted").unwrap(),
            EventSource::System("chats".into()),
            EventPayload::ChatDeleted {
                chat_id: "chat-1".into(),
            },
        );
        controller.handle_event(&event);

        assert!(controller.open_chat_id().is_none());
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn rest_failure_on_open_is_rethrown() {
        let mut api = mock_api();
        api.expect_list_messages().returning(|_, _, _| {
            Err(parley_rest::RestError::Status {
                status: 502,
                message: "bad gateway".into(),
            })
        });
        let (controller, _link, _bus) = controller_with(api);

        assert!(controller.open_chat("chat-1").await.is_err());
    }
}
