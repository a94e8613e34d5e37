//! Message model and its wire representation.
//!
//! [`Message`] is the only entity the reconciler stores. [`WireMessage`] is the
//! lenient JSON shape received from the history endpoint and the live
//! transport; it is validated into a [`Message`] before it can reach the
//! window.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::ReconcileError;

/// Delivery status of a message in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Locally composed, not yet acknowledged by the server.
    Pending,
    /// Known to the server; carries an id.
    Confirmed,
    /// Durable send was rejected. The entry stays visible.
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id; `None` until the send is acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Author of the message.
    pub sender_id: String,
    /// Conversation this message belongs to.
    pub conversation_id: String,
    /// Message body.
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Delivery status.
    pub status: MessageStatus,
    /// Client-side render key. Stable across promotion, never used for dedup.
    #[serde(skip)]
    pub local_key: Uuid,
}

impl Message {
    /// Build an optimistic message for a local send.
    pub fn pending(
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: None,
            sender_id: sender_id.into(),
            conversation_id: conversation_id.into(),
            text: text.into(),
            timestamp,
            status: MessageStatus::Pending,
            local_key: Uuid::new_v4(),
        }
    }

    /// Build a confirmed message as delivered by the server.
    pub fn confirmed(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: Some(id.into()),
            status: MessageStatus::Confirmed,
            ..Self::pending(sender_id, conversation_id, text, timestamp)
        }
    }

    /// Tuple identity used when no id is available.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            sender_id: self.sender_id.clone(),
            conversation_id: self.conversation_id.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp,
        }
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == MessageStatus::Confirmed
    }
}

/// `(sender, conversation, text, timestamp)` identity of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub sender_id: String,
    pub conversation_id: String,
    pub text: String,
    pub timestamp: i64,
}

/// Timestamp as found on the wire: epoch millis (integer or float) or an
/// RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl WireTimestamp {
    /// Epoch milliseconds, or `None` when the value cannot be read.
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Float(ms) if ms.is_finite() => Some(ms.trunc() as i64),
            Self::Float(_) => None,
            Self::Text(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.timestamp_millis())
                .ok()
                .or_else(|| raw.trim().parse().ok()),
        }
    }
}

/// Message as received from the history endpoint or a live push.
///
/// Every field is optional so that validation can name what is missing
/// instead of failing inside serde. A field of the wrong type still fails
/// decoding, so history pages decode each entry on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<WireTimestamp>,
}

impl WireMessage {
    /// Decode a push payload, either `{"message": {...}}` or the bare message.
    pub fn from_push(payload: serde_json::Value) -> Result<Self, ReconcileError> {
        let body = match payload {
            serde_json::Value::Object(mut map)
                if map.get("message").is_some_and(serde_json::Value::is_object) =>
            {
                map.remove("message").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(body).map_err(|e| {
            warn!(name: "push.decode_failed", error = %e, "Push payload is not a message object");
            ReconcileError::MalformedPush {
                missing: "message body",
            }
        })
    }

    /// Decode one history entry.
    pub fn from_entry(entry: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(entry)
    }

    /// The entry's timestamp in epoch millis, if present and readable.
    #[must_use]
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.as_ref().and_then(WireTimestamp::to_millis)
    }

    /// Validate required fields and build a confirmed [`Message`].
    ///
    /// `received_at` stands in for a missing or unreadable timestamp.
    pub fn into_message(self, received_at: i64) -> Result<Message, ReconcileError> {
        let sender_id = self
            .sender_id
            .ok_or(ReconcileError::MalformedPush { missing: "senderId" })?;
        let conversation_id = self
            .conversation_id
            .ok_or(ReconcileError::MalformedPush {
                missing: "conversationId",
            })?;
        let text = self
            .text
            .ok_or(ReconcileError::MalformedPush { missing: "text" })?;
        let timestamp = match self.timestamp.as_ref().map(WireTimestamp::to_millis) {
            Some(Some(ms)) => ms,
            Some(None) => {
                warn!(name: "push.bad_timestamp", "Unreadable timestamp, using receive time");
                received_at
            }
            None => received_at,
        };

        Ok(Message {
            status: MessageStatus::Confirmed,
            id: self.id,
            ..Message::pending(sender_id, conversation_id, text, timestamp)
        })
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: Some(message.sender_id.clone()),
            conversation_id: Some(message.conversation_id.clone()),
            text: Some(message.text.clone()),
            timestamp: Some(WireTimestamp::Millis(message.timestamp)),
        }
    }
}
