//! Shared fakes for the unit tests in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;

use parley_core::model::{ChatMessage, DeliveryState, MessageType};
use parley_rest::{ChatApi, ChatPage, ChatSynopsis, MessagePage, RestError};
use parley_transport::RealtimeLink;

mock! {
    pub Api {}

    #[async_trait]
    impl ChatApi for Api {
        async fn list_chats(&self, page: u32, limit: u32) -> Result<ChatPage, RestError>;
        async fn list_messages(
            &self,
            chat_id: &str,
            page: u32,
            limit: u32,
        ) -> Result<MessagePage, RestError>;
        async fn send_message(
            &self,
            chat_id: &str,
            content: &str,
            message_type: MessageType,
        ) -> Result<ChatMessage, RestError>;
        async fn mark_read(&self, chat_id: &str) -> Result<(), RestError>;
        async fn delete_chat(&self, chat_id: &str) -> Result<(), RestError>;
        async fn chat_synopsis(&self, chat_id: &str) -> Result<ChatSynopsis, RestError>;
    }
}

pub fn mock_api() -> MockApi {
    MockApi::new()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub chat_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub client_ref: String,
}

/// Records every outbound call; the connected flag is flipped by tests to
/// steer callers between the realtime and REST paths.
pub struct FakeLink {
    connected: AtomicBool,
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
    sent: Mutex<Vec<SentFrame>>,
    read_marks: Mutex<Vec<String>>,
    typing: Mutex<Vec<(String, bool)>>,
}

impl FakeLink {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            joined: Mutex::new(Vec::new()),
            left: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            read_marks: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    pub fn left(&self) -> Vec<String> {
        self.left.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn read_marks(&self) -> Vec<String> {
        self.read_marks.lock().unwrap().clone()
    }

    pub fn typing(&self) -> Vec<(String, bool)> {
        self.typing.lock().unwrap().clone()
    }
}

impl RealtimeLink for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn join_chat(&self, chat_id: &str) {
        self.joined.lock().unwrap().push(chat_id.to_string());
    }

    fn leave_chat(&self, chat_id: &str) {
        self.left.lock().unwrap().push(chat_id.to_string());
    }

    fn send_message(&self, chat_id: &str, content: &str, message_type: MessageType, client_ref: &str) {
        self.sent.lock().unwrap().push(SentFrame {
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            message_type,
            client_ref: client_ref.to_string(),
        });
    }

    fn mark_read(&self, chat_id: &str) {
        self.read_marks.lock().unwrap().push(chat_id.to_string());
    }

    fn start_typing(&self, chat_id: &str) {
        self.typing.lock().unwrap().push((chat_id.to_string(), true));
    }

    fn stop_typing(&self, chat_id: &str) {
        self.typing.lock().unwrap().push((chat_id.to_string(), false));
    }
}

pub fn provisional(chat_id: &str, sender_id: &str, content: &str, client_ref: &str) -> ChatMessage {
    ChatMessage::provisional(chat_id, sender_id, content, MessageType::Text, client_ref)
}

pub fn confirmed_message(id: &str, chat_id: &str, sender_id: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        message_type: MessageType::Text,
        is_read: false,
        read_by: Vec::new(),
        created_at: Utc::now(),
        token_count: 1,
        client_ref: None,
        delivery: DeliveryState::Confirmed,
    }
}
