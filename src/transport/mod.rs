//! Live transport seam.
//!
//! The reconciler never talks to a socket directly. A [`Transport`] is handed
//! to the session driver; its lifecycle and inbound pushes arrive as
//! [`TransportEvent`]s on the channel returned by the transport's constructor,
//! and everything the core wants to say goes out as an [`OutboundEvent`].
//!
//! # Frames
//!
//! On the wire every event is a JSON object `{"event": <name>, "data": <payload>}`.
//!
//! ```rust
//! use chat_stream::transport::OutboundEvent;
//!
//! let event = OutboundEvent::UserOnline { user_id: "u1".into() };
//! let frame = serde_json::to_string(&event).unwrap();
//! assert_eq!(frame, r#"{"event":"userOnline","data":{"userId":"u1"}}"#);
//! ```

mod ws;

pub use ws::WsTransport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiResult;
use crate::message::Message;

/// Event name of an inbound message push.
pub const PUSH_EVENT: &str = "receivePersonalMessage";

/// Observable transport lifecycle and inbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A (re)connection attempt started.
    Connecting,
    /// The connection is open.
    Connected,
    /// An open connection dropped or was closed.
    Disconnected,
    /// A connection attempt failed.
    ConnectError(String),
    /// A push arrived. `received_at` is the local receive time in epoch millis.
    MessageReceived {
        payload: serde_json::Value,
        received_at: i64,
    },
}

/// Events the core sends over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// Presence announce.
    #[serde(rename = "userOnline")]
    UserOnline { user_id: String },
    /// Subscribe to a conversation's push channel.
    #[serde(rename = "joinConversation")]
    JoinConversation {
        user_id: String,
        conversation_id: String,
    },
    /// Leave a conversation's push channel.
    #[serde(rename = "leaveConversation")]
    LeaveConversation {
        user_id: String,
        conversation_id: String,
    },
    /// Real-time fan-out of a locally sent message.
    #[serde(rename = "sendMessage")]
    SendMessage {
        conversation_id: String,
        message: Message,
    },
}

impl OutboundEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline { .. } => "userOnline",
            Self::JoinConversation { .. } => "joinConversation",
            Self::LeaveConversation { .. } => "leaveConversation",
            Self::SendMessage { .. } => "sendMessage",
        }
    }
}

/// Persistent connection owned by one conversation session.
///
/// Reconnection policy belongs to the implementation; the core only reacts
/// to the [`TransportEvent`]s it reports.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open the connection. Returns once the attempt is under way.
    async fn connect(&self) -> ApiResult<()>;

    /// Close the connection and stop reconnecting. Must be idempotent and
    /// must not report an event of its own.
    async fn disconnect(&self) -> ApiResult<()>;

    /// Send one event.
    async fn emit(&self, event: OutboundEvent) -> ApiResult<()>;
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode one inbound text frame. Unknown events and garbage yield `None`.
pub fn decode_frame(text: &str, received_at: i64) -> Option<TransportEvent> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring non-JSON frame");
            return None;
        }
    };

    if frame.event == PUSH_EVENT {
        Some(TransportEvent::MessageReceived {
            payload: frame.data,
            received_at,
        })
    } else {
        debug!(event = %frame.event, "Ignoring unhandled event");
        None
    }
}
