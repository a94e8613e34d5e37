//! Message-stream reconciliation state machine.
//!
//! [`StreamReconciler`] merges four racing sources into one window: the
//! initial history page, older pages fetched while scrolling back, live
//! pushes, and local optimistic sends. It performs no I/O. Every asynchronous
//! step is split in two:
//!
//! 1. a `begin_*` call validates preconditions, updates flags and returns a
//!    request ticket stamped with the current session token;
//! 2. the caller runs the collaborator call and hands the result to the
//!    matching `complete_*` call.
//!
//! A ticket whose token no longer matches (after [`StreamReconciler::teardown`]
//! or a new [`StreamReconciler::begin_initialize`]) is rejected with
//! [`ReconcileError::StaleEvent`] and changes nothing.
//!
//! # Example
//!
//! ```rust
//! use chat_stream::api::HistoryPage;
//! use chat_stream::reconciler::StreamReconciler;
//!
//! let mut reconciler = StreamReconciler::new("u1", 20);
//! let request = reconciler.begin_initialize("c1").unwrap();
//! reconciler
//!     .complete_history(request, Ok(HistoryPage::default()))
//!     .unwrap();
//!
//! let send = reconciler.begin_submit("hello", "u1", 1_000).unwrap();
//! assert_eq!(reconciler.window().len(), 1);
//! assert!(send.message.id.is_none());
//! ```

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{HistoryPage, SendAck};
use crate::error::{ApiResult, ReconcileError, Result};
use crate::message::{Message, MessageStatus, WireMessage};
use crate::transport::{OutboundEvent, TransportEvent};
use crate::window::{Cursor, MergeOutcome, MessageWindow};

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Live connection status as observed through transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Initial,
    Older,
}

/// Ticket for one history fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    token: u64,
    kind: FetchKind,
    pub conversation_id: String,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

/// Ticket for one local send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    token: u64,
    /// The optimistic message as it was appended.
    pub message: Message,
    /// Real-time fan-out event for the transport.
    pub outbound: OutboundEvent,
}

/// Result of applying a history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    /// Messages returned by the server.
    pub received: usize,
    /// Messages that changed the window (inserted or promoted).
    pub merged: usize,
    pub has_more_history: bool,
}

/// What a transport event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventEffect {
    /// Status changed, nothing to send.
    StatusChanged(ConnectionStatus),
    /// Connection (re)opened; these events must be emitted.
    Announce(Vec<OutboundEvent>),
    /// A push was merged into the window.
    Merged(MergeOutcome),
    /// A push for another conversation was ignored.
    Foreign,
}

/// Owner of the message window for one conversation session.
#[derive(Debug)]
pub struct StreamReconciler {
    user_id: String,
    page_size: usize,
    window: MessageWindow,
    conversation_id: Option<String>,
    token: u64,
    has_more_history: bool,
    is_fetching_history: bool,
    status: ConnectionStatus,
}

impl StreamReconciler {
    /// Create an idle reconciler for `user_id`. A zero page size falls back
    /// to [`DEFAULT_PAGE_SIZE`].
    pub fn new(user_id: impl Into<String>, page_size: usize) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: if page_size == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                page_size
            },
            window: MessageWindow::new(),
            conversation_id: None,
            token: 0,
            has_more_history: false,
            is_fetching_history: false,
            status: ConnectionStatus::Disconnected,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only view
    // ─────────────────────────────────────────────────────────────────────────

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Whether a conversation session is open.
    pub fn is_active(&self) -> bool {
        self.conversation_id.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more_history
    }

    pub fn is_fetching_history(&self) -> bool {
        self.is_fetching_history
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a session for `conversation_id` and request its newest page.
    ///
    /// Clears the window and invalidates every outstanding ticket. The caller
    /// is expected to open the transport; status moves to `Connecting`.
    pub fn begin_initialize(&mut self, conversation_id: &str) -> Result<HistoryRequest> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ReconcileError::InvalidArgument("conversation id is empty"));
        }

        self.window.clear();
        self.token += 1;
        self.conversation_id = Some(conversation_id.to_string());
        self.has_more_history = false;
        self.is_fetching_history = true;
        self.status = ConnectionStatus::Connecting;

        info!(
            name: "session.initialize",
            conversation_id,
            token = self.token,
            "Starting conversation session"
        );

        Ok(HistoryRequest {
            token: self.token,
            kind: FetchKind::Initial,
            conversation_id: conversation_id.to_string(),
            limit: self.page_size,
            cursor: None,
        })
    }

    /// Request the page preceding the oldest loaded message.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no more history, a
    /// fetch already in flight, or no confirmed message to anchor the cursor.
    pub fn begin_load_older(&mut self) -> Result<Option<HistoryRequest>> {
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or(ReconcileError::NotInitialized)?;

        if !self.has_more_history || self.is_fetching_history {
            return Ok(None);
        }
        let Some(cursor) = self.window.oldest_cursor() else {
            return Ok(None);
        };

        self.is_fetching_history = true;
        debug!(%conversation_id, ?cursor, "Requesting older page");

        Ok(Some(HistoryRequest {
            token: self.token,
            kind: FetchKind::Older,
            conversation_id,
            limit: self.page_size,
            cursor: Some(cursor),
        }))
    }

    /// Apply the outcome of a history fetch started by `begin_initialize` or
    /// `begin_load_older`.
    pub fn complete_history(
        &mut self,
        request: HistoryRequest,
        result: ApiResult<HistoryPage>,
    ) -> Result<PageOutcome> {
        self.check_token(request.token)?;
        self.is_fetching_history = false;

        let page = match result {
            Ok(page) => page,
            Err(source) => {
                warn!(
                    name: "history.fetch_failed",
                    conversation_id = %request.conversation_id,
                    initial = request.kind == FetchKind::Initial,
                    error = %source,
                    "History fetch failed"
                );
                return Err(ReconcileError::FetchFailed { source });
            }
        };

        let received = page.messages.len();
        let mut messages: Vec<Message> = page
            .messages
            .into_iter()
            .filter_map(|entry| self.accept_history_entry(entry))
            .collect();
        messages.sort_by_key(|m| m.timestamp);

        let merged = messages
            .into_iter()
            .map(|m| self.window.merge(m))
            .filter(|outcome| *outcome != MergeOutcome::Duplicate)
            .count();

        self.has_more_history = received >= request.limit;

        info!(
            name: "history.page_applied",
            conversation_id = %request.conversation_id,
            received,
            merged,
            has_more = self.has_more_history,
            "History page applied"
        );

        Ok(PageOutcome {
            received,
            merged,
            has_more_history: self.has_more_history,
        })
    }

    fn accept_history_entry(&self, entry: serde_json::Value) -> Option<Message> {
        let wire = match WireMessage::from_entry(entry) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(name: "history.entry_skipped", error = %e, "Undecodable history entry");
                return None;
            }
        };
        // A history entry cannot borrow a receive time; without its own
        // timestamp it has no place in the order.
        let Some(timestamp) = wire.timestamp_millis() else {
            warn!(
                name: "history.entry_skipped",
                id = wire.id.as_deref().unwrap_or_default(),
                reason = "timestamp",
                "History entry without a readable timestamp"
            );
            return None;
        };
        match wire.into_message(timestamp) {
            Ok(message) if self.conversation_id() == Some(message.conversation_id.as_str()) => {
                Some(message)
            }
            Ok(message) => {
                debug!(conversation_id = %message.conversation_id, "Foreign history entry skipped");
                None
            }
            Err(e) => {
                warn!(name: "history.entry_skipped", error = %e, "Invalid history entry");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Append an optimistic message and return the ticket to deliver it.
    pub fn begin_submit(
        &mut self,
        text: &str,
        sender_id: &str,
        now_ms: i64,
    ) -> Result<SendRequest> {
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or(ReconcileError::NotInitialized)?;
        if text.trim().is_empty() {
            return Err(ReconcileError::InvalidArgument("message text is empty"));
        }
        if sender_id.trim().is_empty() {
            return Err(ReconcileError::InvalidArgument("sender id is empty"));
        }

        let message = Message::pending(sender_id, conversation_id, text, now_ms);
        self.window.merge(message.clone());
        Ok(self.send_request(message))
    }

    /// Re-issue a failed send. Retry policy is the caller's.
    pub fn begin_retry(&mut self, local_key: Uuid) -> Result<SendRequest> {
        if !self.is_active() {
            return Err(ReconcileError::NotInitialized);
        }
        let message = self
            .window
            .mark_retrying(local_key)
            .ok_or(ReconcileError::InvalidArgument("no failed message with that key"))?;
        Ok(self.send_request(message))
    }

    fn send_request(&self, message: Message) -> SendRequest {
        SendRequest {
            token: self.token,
            outbound: OutboundEvent::SendMessage {
                conversation_id: message.conversation_id.clone(),
                message: message.clone(),
            },
            message,
        }
    }

    /// Apply the durable-send result for a ticket from `begin_submit` or
    /// `begin_retry`.
    pub fn complete_send(
        &mut self,
        request: SendRequest,
        result: ApiResult<SendAck>,
    ) -> Result<MergeOutcome> {
        self.check_token(request.token)?;
        let fingerprint = request.message.fingerprint();

        match result {
            Ok(ack) => {
                if let Some(outcome) = self.window.acknowledge(&fingerprint, &ack.id) {
                    debug!(id = %ack.id, ?outcome, "Send acknowledged");
                    return Ok(outcome);
                }
                // The pending entry is gone (collapsed earlier); keep the
                // acknowledged message visible.
                let mut message = request.message;
                message.id = Some(ack.id);
                message.status = MessageStatus::Confirmed;
                Ok(self.window.merge(message))
            }
            Err(source) => {
                warn!(
                    name: "send.failed",
                    local_key = %request.message.local_key,
                    error = %source,
                    "Durable send failed"
                );
                self.window.mark_failed(&fingerprint);
                Err(ReconcileError::SendFailed { source })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// React to one transport event.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Result<EventEffect> {
        let Some(conversation_id) = self.conversation_id.clone() else {
            return Err(ReconcileError::StaleEvent);
        };

        match event {
            TransportEvent::Connecting => Ok(self.set_status(ConnectionStatus::Connecting)),
            TransportEvent::Connected => {
                self.status = ConnectionStatus::Connected;
                info!(name: "transport.joined", %conversation_id, "Announcing presence");
                Ok(EventEffect::Announce(vec![
                    OutboundEvent::UserOnline {
                        user_id: self.user_id.clone(),
                    },
                    OutboundEvent::JoinConversation {
                        user_id: self.user_id.clone(),
                        conversation_id,
                    },
                ]))
            }
            TransportEvent::Disconnected => Ok(self.set_status(ConnectionStatus::Disconnected)),
            TransportEvent::ConnectError(reason) => {
                warn!(name: "transport.connect_error", %reason, "Transport connect error");
                Ok(self.set_status(ConnectionStatus::Disconnected))
            }
            TransportEvent::MessageReceived {
                payload,
                received_at,
            } => {
                let message = WireMessage::from_push(payload)
                    .and_then(|wire| wire.into_message(received_at))
                    .inspect_err(|e| {
                        warn!(name: "push.malformed", error = %e, "Dropping malformed push");
                    })?;

                if message.conversation_id != conversation_id {
                    debug!(
                        foreign = %message.conversation_id,
                        active = %conversation_id,
                        "Ignoring push for another conversation"
                    );
                    return Ok(EventEffect::Foreign);
                }

                let outcome = self.window.merge(message);
                debug!(?outcome, "Push merged");
                Ok(EventEffect::Merged(outcome))
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) -> EventEffect {
        if self.status != status {
            debug!(from = ?self.status, to = ?status, "Connection status changed");
        }
        self.status = status;
        EventEffect::StatusChanged(status)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Close the session. Returns the departure events to emit; empty when
    /// already torn down. The window is kept for display.
    pub fn teardown(&mut self) -> Vec<OutboundEvent> {
        let Some(conversation_id) = self.conversation_id.take() else {
            return Vec::new();
        };

        self.token += 1;
        self.is_fetching_history = false;
        self.status = ConnectionStatus::Disconnected;
        info!(name: "session.teardown", %conversation_id, "Conversation session closed");

        vec![OutboundEvent::LeaveConversation {
            user_id: self.user_id.clone(),
            conversation_id,
        }]
    }

    fn check_token(&self, token: u64) -> Result<()> {
        if self.is_active() && token == self.token {
            Ok(())
        } else {
            debug!(token, current = self.token, "Discarding stale result");
            Err(ReconcileError::StaleEvent)
        }
    }
}
