//! HTTP chat backend

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::Form;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::backend::{ChatBackend, ChatRecord, HistoryMessage, ReplyStream};
use crate::error::{ChatError, Result};

const DISABLE_SYSTEM_PROXY_ENV: &str = "CHATSTREAM_DISABLE_SYSTEM_PROXY";

fn build_http_client() -> Client {
    if should_disable_system_proxy() {
        Client::builder()
            .no_proxy()
            .build()
            .expect("Failed to build reqwest client")
    } else {
        Client::new()
    }
}

fn should_disable_system_proxy() -> bool {
    if std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() {
        return true;
    }

    cfg!(test)
}

/// Chat service client speaking the chunked-reply HTTP API
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
}

impl HttpChatBackend {
    /// Create a backend client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: build_http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success statuses into the error taxonomy. 401 carries its own
    /// meaning (expired session) everywhere this API is called.
    fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(ChatError::SessionExpired),
            status => Err(ChatError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[derive(Deserialize)]
struct NewConversation {
    id: String,
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn create_conversation(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("/api/chat/new"))
            .bearer_auth(token)
            .send()
            .await?;

        let body = Self::check_status(response)?.text().await?;
        let data: NewConversation = serde_json::from_str(&body)?;
        debug!(conversation_id = %data.id, "created conversation");
        Ok(data.id)
    }

    async fn open_reply_stream(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<ReplyStream> {
        let form = Form::new()
            .text("message", text.to_string())
            .text("chatId", chat_id.to_string());

        let response = self
            .client
            .post(self.url("/api/chat/sendStream"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response)?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from));
        Ok(Box::pin(stream))
    }

    async fn list_records(&self, token: &str) -> Result<Vec<ChatRecord>> {
        let response = self
            .client
            .get(self.url("/api/chat/records"))
            .bearer_auth(token)
            .send()
            .await?;

        let body = Self::check_status(response)?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_history(&self, token: &str, chat_id: &str) -> Result<Vec<HistoryMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/api/chat/{chat_id}")))
            .bearer_auth(token)
            .send()
            .await?;

        let body = Self::check_status(response)?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
