//! WebSocket transport with JSON event frames and fixed-delay reconnects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{OutboundEvent, Transport, TransportEvent, decode_frame};
use crate::error::{ApiError, ApiResult};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket implementation of [`Transport`].
///
/// While connected, a background task reads frames and forwards lifecycle and
/// push events. When the socket drops it waits `reconnect_delay` and dials
/// again until [`Transport::disconnect`] is called, which reports no event.
pub struct WsTransport {
    url: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    writer: Arc<Mutex<Option<WsSink>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Create a transport and the receiver its events are delivered on.
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            url: url.into(),
            reconnect_delay,
            events,
            writer: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        };
        (transport, rx)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> ApiResult<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let url = self.url.clone();
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        let writer = Arc::clone(&self.writer);
        *task = Some(tokio::spawn(connection_loop(url, delay, events, writer)));
        Ok(())
    }

    async fn disconnect(&self) -> ApiResult<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            info!(name: "transport.closed", url = %self.url, "Closing websocket");
            sink.close().await?;
        }
        Ok(())
    }

    async fn emit(&self, event: OutboundEvent) -> ApiResult<()> {
        let frame = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(ApiError::NotConnected)?;
        debug!(event = event.name(), "Emitting frame");
        sink.send(WsMessage::Text(frame)).await?;
        Ok(())
    }
}

async fn connection_loop(
    url: String,
    delay: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    writer: Arc<Mutex<Option<WsSink>>>,
) {
    loop {
        if events.send(TransportEvent::Connecting).is_err() {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(name: "transport.connected", url = %url, "Websocket connected");
                let (sink, mut source) = stream.split();
                *writer.lock().await = Some(sink);
                let _ = events.send(TransportEvent::Connected);

                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => {
                            let received_at = chrono::Utc::now().timestamp_millis();
                            if let Some(event) = decode_frame(&text, received_at) {
                                let _ = events.send(event);
                            }
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(name: "transport.read_failed", error = %e, "Websocket read failed");
                            break;
                        }
                    }
                }

                writer.lock().await.take();
                info!(name: "transport.dropped", url = %url, "Websocket dropped");
                let _ = events.send(TransportEvent::Disconnected);
            }
            Err(e) => {
                warn!(name: "transport.connect_failed", url = %url, error = %e, "Websocket connect failed");
                let _ = events.send(TransportEvent::ConnectError(e.to_string()));
            }
        }

        tokio::time::sleep(delay).await;
    }
}
