//! Request/response collaborators: history fetch and durable send.
//!
//! These are the seams the reconciler talks to. [`crate::client::HttpChatApi`]
//! is the HTTP implementation; tests provide in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::message::Message;
use crate::window::Cursor;

/// One page of history as returned by the server.
///
/// Order is whatever the server chose; the reconciler sorts. Entries stay
/// raw JSON so that one malformed entry is skipped on its own instead of
/// failing the whole page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Server acknowledgment of a durable send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    #[serde(alias = "_id")]
    pub id: String,
}

/// Source of past messages for a conversation.
#[async_trait]
pub trait HistorySource: Send + Sync + std::fmt::Debug {
    /// Fetch up to `limit` messages. `cursor == None` means the most recent page.
    async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> ApiResult<HistoryPage>;
}

/// Durable (acknowledged) message delivery.
#[async_trait]
pub trait DurableSender: Send + Sync + std::fmt::Debug {
    async fn send_durable(&self, message: &Message) -> ApiResult<SendAck>;
}
