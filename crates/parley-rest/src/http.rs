use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use parley_core::auth::TokenSource;
use parley_core::model::{ChatMessage, MessageType};

use crate::error::RestError;
use crate::types::{ChatPage, ChatSynopsis, MessagePage, SendMessageBody};
use crate::ChatApi;

/// `ChatApi` over HTTP, with the bearer credential read per request from
/// the externally-owned token source.
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl HttpChatApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, RestError> {
        let base_url =
            Url::parse(base_url).map_err(|e| RestError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            tokens,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RestError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RestError::InvalidUrl("base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bearer(&self) -> Result<String, RestError> {
        self.tokens
            .bearer_token()
            .map(|token| format!("Bearer {token}"))
            .ok_or(RestError::MissingCredentials)
    }

    async fn check(response: Response) -> Result<Response, RestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn parse_json<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, RestError> {
        Ok(serde_json::from_str(text)?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RestError> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        let text = Self::check(response).await?.text().await?;
        Self::parse_json(&text)
    }
}

#[async_trait::async_trait]
impl ChatApi for HttpChatApi {
    async fn list_chats(&self, page: u32, limit: u32) -> Result<ChatPage, RestError> {
        let mut url = self.endpoint(&["chats"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, RestError> {
        let mut url = self.endpoint(&["chats", chat_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<ChatMessage, RestError> {
        let url = self.endpoint(&["chats", chat_id, "messages"])?;
        debug!(url = %url, "POST message");
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer()?)
            .json(&SendMessageBody {
                message: content.to_string(),
                message_type,
            })
            .send()
            .await?;
        let text = Self::check(response).await?.text().await?;
        Self::parse_json(&text)
    }

    async fn mark_read(&self, chat_id: &str) -> Result<(), RestError> {
        let url = self.endpoint(&["chats", chat_id, "read"])?;
        debug!(url = %url, "POST read");
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<(), RestError> {
        let url = self.endpoint(&["chats", chat_id])?;
        debug!(url = %url, "DELETE chat");
        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn chat_synopsis(&self, chat_id: &str) -> Result<ChatSynopsis, RestError> {
        let url = self.endpoint(&["chats", chat_id, "summary"])?;
        self.get_json(url).await
    }
}
