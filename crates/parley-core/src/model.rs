use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix distinguishing locally-generated provisional ids from server ids.
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

/// Observable state of the one realtime connection per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// The list-view representation of a conversation, as opposed to its full
/// message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: String,

    /// User ids of the conversation participants.
    pub participants: Vec<String>,

    pub last_message_preview: Option<String>,

    pub last_message_time: Option<DateTime<Utc>>,

    pub unread_count: u32,
}

impl ChatSummary {
    /// A summary stub for a chat first seen through an inbound message.
    pub fn stub(chat_id: &str, sender_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            participants: vec![sender_id.to_string()],
            last_message_preview: None,
            last_message_time: None,
            unread_count: 0,
        }
    }
}

/// One chat utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id, or a `temp-` prefixed local id while provisional.
    pub id: String,

    pub chat_id: String,

    pub sender_id: String,

    /// Plain-text content.
    pub content: String,

    pub message_type: MessageType,

    pub is_read: bool,

    /// User ids that have acknowledged reading this message.
    #[serde(default)]
    pub read_by: Vec<String>,

    pub created_at: DateTime<Utc>,

    /// Billing-relevant token estimate. Locally estimated for provisional
    /// messages, authoritative once the server confirms.
    #[serde(default)]
    pub token_count: u32,

    /// Client-generated correlation id attached to optimistic sends and
    /// echoed back by the server; the reconciliation key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,

    /// Local delivery bookkeeping; never sent on the wire, and inbound
    /// messages default to `Confirmed`.
    #[serde(default, skip_serializing)]
    pub delivery: DeliveryState,
}

impl ChatMessage {
    /// Build the optimistic local entry for a realtime send.
    pub fn provisional(
        chat_id: &str,
        sender_id: &str,
        content: &str,
        message_type: MessageType,
        client_ref: &str,
    ) -> Self {
        Self {
            id: format!("{PROVISIONAL_ID_PREFIX}{}", Uuid::new_v4()),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            message_type,
            is_read: false,
            read_by: Vec::new(),
            created_at: Utc::now(),
            token_count: estimate_token_count(content),
            client_ref: Some(client_ref.to_string()),
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_ID_PREFIX)
    }

    /// The one-line text shown in the chat list.
    pub fn preview(&self) -> String {
        match self.message_type {
            MessageType::Image => "[image]".to_string(),
            MessageType::File => "[file]".to_string(),
            MessageType::Text | MessageType::System => self.content.clone(),
        }
    }
}

/// Rough chars-per-token estimate used until the server reports the real
/// count.
pub fn estimate_token_count(content: &str) -> u32 {
    u32::try_from(content.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryState {
    /// Optimistically inserted, awaiting the server echo.
    Pending,
    /// Server-confirmed (the default for anything received on the wire).
    #[default]
    Confirmed,
    /// The send is known to have failed; kept visible rather than silently
    /// indistinguishable from confirmed state.
    Failed,
}
