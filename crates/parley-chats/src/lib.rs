//! Chat list state for the Parley core.
//!
//! [`ChatDirectory`] is the single owner of the chat list: summaries,
//! unread counts, and which chat is currently on screen. Inbound traffic
//! reaches it through the event bus; the host UI reads snapshots and never
//! mutates.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use parley_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use parley_core::model::{ChatMessage, ChatSummary};
use parley_rest::{ChatApi, ChatSynopsis, RestError};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("rest request failed: {0}")]
    Rest(#[from] RestError),

    #[error("event bus error: {0}")]
    EventBus(String),
}

#[derive(Default)]
struct DirectoryState {
    chats: Vec<ChatSummary>,
    active_chat: Option<String>,
    current_page: u32,
    total_pages: u32,
    loading: bool,
}

pub struct ChatDirectory {
    api: Arc<dyn ChatApi>,
    bus: Arc<dyn EventBus>,
    self_user_id: String,
    page_size: u32,
    state: Mutex<DirectoryState>,
}

impl ChatDirectory {
    pub fn new(
        api: Arc<dyn ChatApi>,
        bus: Arc<dyn EventBus>,
        self_user_id: impl Into<String>,
        page_size: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            bus,
            self_user_id: self_user_id.into(),
            page_size,
            state: Mutex::new(DirectoryState::default()),
        })
    }

    /// Fetches a page of the chat list. Page 1 replaces the list; later
    /// pages append, skipping chats already present. A fetch already in
    /// flight makes this a no-op.
    pub async fn load_chats(&self, page: u32) -> Result<(), DirectoryError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.loading {
                debug!(page, "chat list fetch already in flight, skipping");
                return Ok(());
            }
            state.loading = true;
        }

        let result = self.api.list_chats(page, self.page_size).await;
        let mut state = self.state.lock().expect("lock poisoned");
        state.loading = false;
        let fetched = result?;
        if page <= 1 {
            state.chats = fetched.chats;
        } else {
            for chat in fetched.chats {
                if !state.chats.iter().any(|c| c.chat_id == chat.chat_id) {
                    state.chats.push(chat);
                }
            }
        }
        state.current_page = fetched.current_page;
        state.total_pages = fetched.total_pages;
        debug!(
            page = state.current_page,
            total_pages = state.total_pages,
            chats = state.chats.len(),
            "chat list loaded"
        );
        Ok(())
    }

    /// Deletes a chat on the server, then locally. The REST failure is
    /// rethrown so the caller can tell the user nothing was deleted.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), DirectoryError> {
        self.api.delete_chat(chat_id).await?;

        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.chats.retain(|c| c.chat_id != chat_id);
            if state.active_chat.as_deref() == Some(chat_id) {
                state.active_chat = None;
            }
        }
        self.notify(
            "chat.deleted",
            EventPayload::ChatDeleted {
                chat_id: chat_id.to_string(),
            },
        );
        Ok(())
    }

    /// The server-side AI summary of a conversation.
    pub async fn synopsis(&self, chat_id: &str) -> Result<ChatSynopsis, DirectoryError> {
        Ok(self.api.chat_synopsis(chat_id).await?)
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.state.lock().expect("lock poisoned").chats.clone()
    }

    pub fn active_chat(&self) -> Option<String> {
        self.state.lock().expect("lock poisoned").active_chat.clone()
    }

    pub fn unread_total(&self) -> u32 {
        self.state
            .lock()
            .expect("lock poisoned")
            .chats
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    pub fn has_more_chats(&self) -> bool {
        let state = self.state.lock().expect("lock poisoned");
        state.current_page < state.total_pages
    }

    /// Folds one message into the list: preview and timestamp always move,
    /// the unread count only when the message is from someone else for a
    /// chat that is not on screen.
    fn record_message(&self, chat_id: &str, message: &ChatMessage) {
        let mut state = self.state.lock().expect("lock poisoned");
        let counts_as_unread = message.sender_id != self.self_user_id
            && state.active_chat.as_deref() != Some(chat_id);

        let mut chat = match state.chats.iter().position(|c| c.chat_id == chat_id) {
            Some(index) => state.chats.remove(index),
            None => {
                debug!(chat_id, "message for unknown chat, adding stub entry");
                ChatSummary::stub(chat_id, &message.sender_id)
            }
        };
        chat.last_message_preview = Some(message.preview());
        chat.last_message_time = Some(message.created_at);
        if counts_as_unread {
            chat.unread_count += 1;
        }
        // The most recently active chat floats to the top.
        state.chats.insert(0, chat);
    }

    fn clear_unread(&self, chat_id: &str) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(chat) = state.chats.iter_mut().find(|c| c.chat_id == chat_id) {
            chat.unread_count = 0;
        }
    }

    fn remove_chat(&self, chat_id: &str) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.chats.retain(|c| c.chat_id != chat_id);
        if state.active_chat.as_deref() == Some(chat_id) {
            state.active_chat = None;
        }
    }

    pub fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::MessageReceived { chat_id, message } => {
                self.record_message(chat_id, message);
            }
            EventPayload::MessageSent { message } => {
                self.record_message(&message.chat_id, message);
            }
            EventPayload::MessagesRead { chat_id, user_id, .. }
                if *user_id == self.self_user_id =>
            {
                self.clear_unread(chat_id);
            }
            EventPayload::ChatOpened { chat_id } => {
                {
                    let mut state = self.state.lock().expect("lock poisoned");
                    state.active_chat = Some(chat_id.clone());
                }
                self.clear_unread(chat_id);
            }
            EventPayload::ChatClosed { chat_id } => {
                let mut state = self.state.lock().expect("lock poisoned");
                if state.active_chat.as_deref() == Some(chat_id) {
                    state.active_chat = None;
                }
            }
            EventPayload::ChatDeleted { chat_id } => {
                self.remove_chat(chat_id);
            }
            _ => {}
        }
    }

    /// Subscribes and returns the event loop future. The subscription is
    /// live before this returns, so events published after the call are
    /// seen even if the future is polled later.
    pub fn run(
        self: Arc<Self>,
    ) -> Result<impl std::future::Future<Output = Result<(), DirectoryError>>, DirectoryError>
    {
        let mut sub = self
            .bus
            .subscribe("{chat,ui}.**")
            .map_err(|e| DirectoryError::EventBus(e.to_string()))?;

        Ok(async move {
            loop {
                match sub.recv().await {
                    Ok(event) => self.handle_event(&event),
                    Err(parley_core::error::EventBusError::ChannelClosed) => {
                        debug!("event bus closed, chat directory stopping");
                        return Ok(());
                    }
                    Err(parley_core::error::EventBusError::Lagged(count)) => {
                        warn!(count, "chat directory lagged, some events dropped");
                    }
                    Err(e) => {
                        error!(error = %e, "chat directory subscription error");
                        return Err(DirectoryError::EventBus(e.to_string()));
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
            EventSource::System("chats".into()),
            payload,
        ));
    }
}
