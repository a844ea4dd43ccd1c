use parley_core::model::{ChatMessage, ChatSummary};
use serde::{Deserialize, Serialize};

/// One page of the chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPage {
    pub chats: Vec<ChatSummary>,
    pub current_page: u32,
    pub total_pages: u32,
}

/// One page of a chat's message history, newest-first as the server
/// returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub current_page: u32,
    pub total_pages: u32,
}

impl MessagePage {
    pub fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }
}

/// Body for `POST /chats/{chatId}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageBody {
    pub message: String,
    pub message_type: parley_core::model::MessageType,
}

/// AI-generated conversation summary; consumed, not computed, by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSynopsis {
    pub summary: String,
    pub key_points: Vec<String>,
    pub token_usage: u32,
}
