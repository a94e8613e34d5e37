//! HTTP client for the chat history and send endpoints.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::api::{DurableSender, HistoryPage, HistorySource, SendAck};
use crate::error::{ApiError, ApiResult};
use crate::message::{Message, WireMessage};
use crate::window::Cursor;

/// HTTP client for the chat API.
///
/// # Example
///
/// ```rust,no_run
/// use chat_stream::{HistorySource, HttpChatApi};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let api = HttpChatApi::new("http://localhost:3007")?;
/// let page = api.fetch_history("673490d16630bd00b48b0913", 20, None).await?;
/// println!("{} messages", page.messages.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpChatApi {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the server (e.g., "http://localhost:3007")
    pub fn new(base_url: impl AsRef<str>) -> ApiResult<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(base_url: impl AsRef<str>, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(base_url, http)
    }

    /// Create a new client with a custom reqwest client.
    pub fn with_client(base_url: impl AsRef<str>, http: reqwest::Client) -> ApiResult<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self { base_url, http })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn messages_url(&self, conversation_id: &str) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["chat", "conversation", conversation_id, "messages"]);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> ApiResult<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(ApiError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl HistorySource for HttpChatApi {
    async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> ApiResult<HistoryPage> {
        let mut request = self
            .http
            .get(self.messages_url(conversation_id)?)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[
                ("beforeId", cursor.before_id.clone()),
                ("before", cursor.before_timestamp.to_string()),
            ]);
        }

        debug!(conversation_id, limit, ?cursor, "Fetching history page");
        let response = request.send().await?;
        Self::handle_response(response).await
    }
}

#[async_trait]
impl DurableSender for HttpChatApi {
    async fn send_durable(&self, message: &Message) -> ApiResult<SendAck> {
        let body = WireMessage::from(message);
        let response = self
            .http
            .post(self.messages_url(&message.conversation_id)?)
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }
}
