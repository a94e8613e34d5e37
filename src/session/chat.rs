//! Async driver around [`StreamReconciler`].

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::{DurableSender, HistorySource};
use crate::error::{ReconcileError, Result};
use crate::message::Message;
use crate::reconciler::{
    ConnectionStatus, DEFAULT_PAGE_SIZE, EventEffect, PageOutcome, SendRequest, StreamReconciler,
};
use crate::transport::{OutboundEvent, Transport, TransportEvent};
use crate::window::MergeOutcome;

/// Default distance from the top of the viewport, in pixels, at which
/// scrolling triggers an older-page fetch.
pub const DEFAULT_SCROLL_THRESHOLD_PX: f64 = 50.0;

/// Per-session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub user_id: String,
    pub page_size: usize,
    pub scroll_threshold_px: f64,
}

impl SessionOptions {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_scroll_threshold(mut self, px: f64) -> Self {
        self.scroll_threshold_px = px;
        self
    }
}

/// One conversation session wired to its collaborators.
///
/// Cheap to clone; clones share the same state. The reconciler lock is only
/// held for the synchronous halves of each operation, never across a
/// collaborator call, so a slow fetch does not block live pushes.
#[derive(Debug, Clone)]
pub struct ChatSession {
    inner: Arc<ChatInner>,
}

#[derive(Debug)]
struct ChatInner {
    reconciler: Mutex<StreamReconciler>,
    history: Arc<dyn HistorySource>,
    sender: Arc<dyn DurableSender>,
    transport: Arc<dyn Transport>,
    scroll_threshold_px: f64,
    revision: watch::Sender<u64>,
}

impl ChatSession {
    pub fn new(
        options: SessionOptions,
        history: Arc<dyn HistorySource>,
        sender: Arc<dyn DurableSender>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ChatInner {
                reconciler: Mutex::new(StreamReconciler::new(options.user_id, options.page_size)),
                history,
                sender,
                transport,
                scroll_threshold_px: options.scroll_threshold_px,
                revision,
            }),
        }
    }

    /// Open `conversation_id`: load its newest page and connect the transport.
    ///
    /// An already open conversation is torn down first.
    pub async fn initialize(&self, conversation_id: &str) -> Result<PageOutcome> {
        if conversation_id.trim().is_empty() {
            return Err(ReconcileError::InvalidArgument("conversation id is empty"));
        }

        let (leave, request) = {
            let mut reconciler = self.inner.reconciler.lock().await;
            let leave = reconciler.teardown();
            (leave, reconciler.begin_initialize(conversation_id)?)
        };
        self.bump();

        if !leave.is_empty() {
            self.emit_all(leave).await;
            if let Err(e) = self.inner.transport.disconnect().await {
                warn!(name: "transport.disconnect_failed", error = %e, "Disconnect failed");
            }
        }

        let (connected, page) = tokio::join!(
            self.inner.transport.connect(),
            self.inner.history.fetch_history(
                &request.conversation_id,
                request.limit,
                request.cursor.as_ref()
            )
        );
        if let Err(e) = connected {
            warn!(name: "transport.connect_failed", error = %e, "Transport connect failed");
        }

        let outcome = self
            .inner
            .reconciler
            .lock()
            .await
            .complete_history(request, page);
        self.bump();
        outcome
    }

    /// Fetch the page before the oldest loaded message.
    ///
    /// `Ok(None)` means nothing was fetched: history is exhausted or another
    /// fetch is already in flight.
    pub async fn load_older_page(&self) -> Result<Option<PageOutcome>> {
        let request = {
            let mut reconciler = self.inner.reconciler.lock().await;
            reconciler.begin_load_older()?
        };
        let Some(request) = request else {
            return Ok(None);
        };
        self.bump();

        let page = self
            .inner
            .history
            .fetch_history(&request.conversation_id, request.limit, request.cursor.as_ref())
            .await;

        let outcome = self
            .inner
            .reconciler
            .lock()
            .await
            .complete_history(request, page);
        self.bump();
        outcome.map(Some)
    }

    /// Scroll hook: loads an older page once the viewport is within the
    /// configured threshold of the top.
    pub async fn on_scroll(&self, offset_from_top: f64) -> Result<Option<PageOutcome>> {
        if offset_from_top > self.inner.scroll_threshold_px {
            return Ok(None);
        }
        self.load_older_page().await
    }

    /// Append an optimistic message and deliver it over both paths.
    pub async fn submit_message(&self, text: &str, sender_id: &str) -> Result<MergeOutcome> {
        let request = {
            let mut reconciler = self.inner.reconciler.lock().await;
            reconciler.begin_submit(text, sender_id, now_ms())?
        };
        self.bump();
        self.dispatch_send(request).await
    }

    /// Re-send a message whose durable send failed.
    pub async fn retry_failed(&self, local_key: Uuid) -> Result<MergeOutcome> {
        let request = {
            let mut reconciler = self.inner.reconciler.lock().await;
            reconciler.begin_retry(local_key)?
        };
        self.bump();
        self.dispatch_send(request).await
    }

    async fn dispatch_send(&self, request: SendRequest) -> Result<MergeOutcome> {
        let (emitted, acked) = tokio::join!(
            self.inner.transport.emit(request.outbound.clone()),
            self.inner.sender.send_durable(&request.message)
        );
        if let Err(e) = emitted {
            warn!(
                name: "send.emit_failed",
                local_key = %request.message.local_key,
                error = %e,
                "Real-time fan-out failed"
            );
        }

        let outcome = self
            .inner
            .reconciler
            .lock()
            .await
            .complete_send(request, acked);
        self.bump();
        outcome
    }

    /// Apply one transport event and emit whatever it requires.
    pub async fn handle_transport_event(&self, event: TransportEvent) -> Result<EventEffect> {
        let effect = self
            .inner
            .reconciler
            .lock()
            .await
            .on_transport_event(event)?;
        self.bump();

        if let EventEffect::Announce(events) = &effect {
            self.emit_all(events.clone()).await;
        }
        Ok(effect)
    }

    /// Drain transport events into the session until the channel closes.
    pub async fn pump_events(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match self.handle_transport_event(event).await {
                Ok(_) => {}
                Err(ReconcileError::StaleEvent) => debug!("Transport event after teardown"),
                Err(e) => debug!(error = %e, "Transport event rejected"),
            }
        }
        debug!("Transport event channel closed");
    }

    /// Leave the conversation and close the transport. Safe to call twice.
    pub async fn teardown(&self) {
        let leave = self.inner.reconciler.lock().await.teardown();
        if leave.is_empty() {
            return;
        }
        self.bump();

        self.emit_all(leave).await;
        if let Err(e) = self.inner.transport.disconnect().await {
            warn!(name: "transport.disconnect_failed", error = %e, "Disconnect failed");
        }
    }

    async fn emit_all(&self, events: Vec<OutboundEvent>) {
        for event in events {
            let name = event.name();
            if let Err(e) = self.inner.transport.emit(event).await {
                warn!(name: "transport.emit_failed", event = name, error = %e, "Emit failed");
            }
        }
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read-only projection
    // ─────────────────────────────────────────────────────────────────────────

    /// Current window, oldest first.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.reconciler.lock().await.window().to_vec()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.reconciler.lock().await.status()
    }

    pub async fn has_more_history(&self) -> bool {
        self.inner.reconciler.lock().await.has_more_history()
    }

    pub async fn is_fetching_history(&self) -> bool {
        self.inner.reconciler.lock().await.is_fetching_history()
    }

    pub async fn conversation_id(&self) -> Option<String> {
        self.inner
            .reconciler
            .lock()
            .await
            .conversation_id()
            .map(str::to_string)
    }

    pub async fn user_id(&self) -> String {
        self.inner.reconciler.lock().await.user_id().to_string()
    }

    /// Revision counter, bumped after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
