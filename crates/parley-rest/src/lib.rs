mod error;
mod http;
mod types;

pub use error::RestError;
pub use http::HttpChatApi;
pub use types::{ChatPage, ChatSynopsis, MessagePage};

use parley_core::model::{ChatMessage, MessageType};

/// The REST collaborator consumed by the synchronization core.
///
/// Implementations are the only REST mutation source; retries and timeouts
/// are the implementation's concern, not the core's.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /chats?page&limit`
    async fn list_chats(&self, page: u32, limit: u32) -> Result<ChatPage, RestError>;

    /// `GET /chats/{chatId}/messages?page&limit` — newest-first pages.
    async fn list_messages(
        &self,
        chat_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, RestError>;

    /// `POST /chats/{chatId}/messages` — returns the confirmed message.
    async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<ChatMessage, RestError>;

    /// `POST /chats/{chatId}/read`
    async fn mark_read(&self, chat_id: &str) -> Result<(), RestError>;

    /// `DELETE /chats/{chatId}`
    async fn delete_chat(&self, chat_id: &str) -> Result<(), RestError>;

    /// `GET /chats/{chatId}/summary`
    async fn chat_synopsis(&self, chat_id: &str) -> Result<ChatSynopsis, RestError>;
}
