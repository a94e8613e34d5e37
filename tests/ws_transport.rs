use std::time::Duration;

use chat_stream::error::ApiError;
use chat_stream::transport::{OutboundEvent, PUSH_EVENT, Transport, TransportEvent, WsTransport};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

/// Server that answers the first frame of the first connection with a push
/// and then hangs up; later connections are only recorded.
async fn start_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let frames = frames_tx.clone();
            let mut ws = accept_async(stream).await.unwrap();
            let first_connection = connection == 1;

            tokio::spawn(async move {
                while let Some(Ok(frame)) = ws.next().await {
                    let WsMessage::Text(text) = frame else {
                        continue;
                    };
                    let _ = frames.send(text);
                    if first_connection {
                        let push = json!({
                            "event": PUSH_EVENT,
                            "data": { "message": {
                                "_id": "m1", "senderId": "u2", "conversationId": "c1",
                                "text": "hello", "timestamp": 1_000
                            }}
                        });
                        ws.send(WsMessage::Text(push.to_string())).await.unwrap();
                        ws.close(None).await.unwrap();
                        break;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), frames_rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_connect_emit_push_and_reconnect() {
    let (url, mut frames) = start_server().await;
    let (transport, mut events) = WsTransport::new(url, Duration::from_millis(50));

    transport.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport
        .emit(OutboundEvent::UserOnline {
            user_id: "u1".into(),
        })
        .await
        .unwrap();
    let frame = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(frame, r#"{"event":"userOnline","data":{"userId":"u1"}}"#);

    match next_event(&mut events).await {
        TransportEvent::MessageReceived { payload, .. } => {
            assert_eq!(payload["message"]["_id"], "m1");
        }
        other => panic!("expected push, got {other:?}"),
    }

    // Server hung up: the transport reports the drop and dials again.
    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    // A deliberate close reports nothing, so it cannot leak into a new session.
    transport.disconnect().await.unwrap();
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );

    let err = transport
        .emit(OutboundEvent::UserOnline {
            user_id: "u1".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotConnected));

    // Idempotent.
    transport.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_reports_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (transport, mut events) = WsTransport::new(format!("ws://{addr}"), Duration::from_millis(20));
    transport.connect().await.unwrap();

    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectError(_)
    ));
    // Keeps retrying until told to stop.
    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);

    transport.disconnect().await.unwrap();
}
