//! In-memory collaborators for driving `ChatSession` in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chat_stream::api::{DurableSender, HistoryPage, HistorySource, SendAck};
use chat_stream::error::{ApiError, ApiResult};
use chat_stream::message::Message;
use chat_stream::session::{ChatSession, SessionOptions};
use chat_stream::transport::{OutboundEvent, Transport};
use chat_stream::window::Cursor;
use serde_json::{Value, json};
use tokio::sync::Notify;

pub const USER: &str = "u1";
pub const CONVERSATION: &str = "c1";

/// Confirmed wire message from `sender` in the test conversation.
pub fn wire(id: &str, sender: &str, text: &str, timestamp: i64) -> Value {
    wire_in(CONVERSATION, id, sender, text, timestamp)
}

pub fn wire_in(
    conversation_id: &str,
    id: &str,
    sender: &str,
    text: &str,
    timestamp: i64,
) -> Value {
    json!({
        "_id": id,
        "senderId": sender,
        "conversationId": conversation_id,
        "text": text,
        "timestamp": timestamp,
    })
}

/// `n` consecutive messages `m{start}..` one second apart.
pub fn run_of(start: usize, n: usize) -> Vec<Value> {
    (start..start + n)
        .map(|i| wire(&format!("m{i}"), "u2", &format!("text {i}"), i as i64 * 1_000))
        .collect()
}

#[derive(Debug, Clone)]
pub struct HistoryCall {
    pub conversation_id: String,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

/// History source that answers from a queue of scripted pages.
///
/// When gated, every fetch waits for one `release()` before answering.
#[derive(Debug, Default)]
pub struct ScriptedHistory {
    pages: Mutex<VecDeque<ApiResult<HistoryPage>>>,
    calls: Mutex<Vec<HistoryCall>>,
    count: AtomicUsize,
    gate: Option<Notify>,
}

impl ScriptedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    pub fn push_page(&self, messages: Vec<Value>) {
        self.pages
            .lock()
            .unwrap()
            .push_back(Ok(HistoryPage { messages }));
    }

    pub fn push_error(&self, status: u16) {
        self.pages.lock().unwrap().push_back(Err(ApiError::Api {
            status,
            message: "scripted failure".into(),
        }));
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<HistoryCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySource for ScriptedHistory {
    async fn fetch_history(
        &self,
        conversation_id: &str,
        limit: usize,
        cursor: Option<&Cursor>,
    ) -> ApiResult<HistoryPage> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(HistoryCall {
            conversation_id: conversation_id.to_string(),
            limit,
            cursor: cursor.cloned(),
        });

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HistoryPage::default()))
    }
}

/// Durable sender that acks with `srv-{n}` ids, or fails while `failing`.
#[derive(Debug, Default)]
pub struct FakeSender {
    sent: Mutex<Vec<Message>>,
    next_id: AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
    fixed_id: Mutex<Option<String>>,
}

impl FakeSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Ack the next send with this id instead of a generated one.
    pub fn ack_with(&self, id: &str) {
        *self.fixed_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DurableSender for FakeSender {
    async fn send_durable(&self, message: &Message) -> ApiResult<SendAck> {
        self.sent.lock().unwrap().push(message.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Api {
                status: 500,
                message: "send rejected".into(),
            });
        }
        let id = self.fixed_id.lock().unwrap().take().unwrap_or_else(|| {
            format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
        });
        Ok(SendAck { id })
    }
}

/// Transport that records lifecycle calls and emitted events.
#[derive(Debug, Default)]
pub struct FakeTransport {
    emitted: Mutex<Vec<OutboundEvent>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<OutboundEvent> {
        self.emitted.lock().unwrap().clone()
    }

    pub fn emitted_names(&self) -> Vec<&'static str> {
        self.emitted().iter().map(OutboundEvent::name).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> ApiResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ApiResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn emit(&self, event: OutboundEvent) -> ApiResult<()> {
        self.emitted.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct Harness {
    pub session: ChatSession,
    pub history: Arc<ScriptedHistory>,
    pub sender: Arc<FakeSender>,
    pub transport: Arc<FakeTransport>,
}

impl Harness {
    pub fn new(history: ScriptedHistory) -> Self {
        Self::with_page_size(history, 20)
    }

    pub fn with_page_size(history: ScriptedHistory, page_size: usize) -> Self {
        let history = Arc::new(history);
        let sender = Arc::new(FakeSender::new());
        let transport = Arc::new(FakeTransport::new());
        let session = ChatSession::new(
            SessionOptions::new(USER).with_page_size(page_size),
            Arc::clone(&history) as Arc<dyn HistorySource>,
            Arc::clone(&sender) as Arc<dyn DurableSender>,
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        Self {
            session,
            history,
            sender,
            transport,
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        self.session
            .snapshot()
            .await
            .into_iter()
            .filter_map(|m| m.id)
            .collect()
    }
}
