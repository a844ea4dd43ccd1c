//! JSON frames exchanged over the realtime socket.
//!
//! Every frame is an envelope of `{"event": "...", "data": {...}}` with
//! snake_case event names and camelCase data fields.

use parley_core::model::{ChatMessage, MessageType};
use serde::{Deserialize, Serialize};

/// Frames the client emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinChat { chat_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveChat { chat_id: String },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        chat_id: String,
        message: String,
        message_type: MessageType,
        client_ref: String,
    },
    #[serde(rename_all = "camelCase")]
    MarkAsRead { chat_id: String },
    #[serde(rename_all = "camelCase")]
    StartTyping { chat_id: String },
    #[serde(rename_all = "camelCase")]
    StopTyping { chat_id: String },
}

/// Frames the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: String,
        message: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        chat_id: String,
        user_id: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        chat_id: String,
        user_id: String,
        message_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    UserStatus { user_id: String, is_online: bool },
    Error { message: String },
}
