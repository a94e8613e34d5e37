//! Chat Stream terminal client
//!
//! Opens one conversation, prints the message window as it changes and sends
//! every stdin line as a message.
//!
//! Commands: `/older` loads an older page, `/retry` re-sends failed messages,
//! `/reload` re-opens the conversation and `/quit` leaves it.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use chat_stream::config::AppConfig;
use chat_stream::{ChatSession, HttpChatApi, Message, MessageStatus, WsTransport, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let Some(user_id) = config.chat.user_id.clone() else {
        bail!("chat.user_id is required (--user-id or CHAT_USER_ID)");
    };
    let Some(conversation_id) = config.chat.conversation_id.clone() else {
        bail!("chat.conversation_id is required (--conversation-id or CHAT_CONVERSATION_ID)");
    };

    info!(
        name: "chat.config.loaded",
        http_base_url = %config.server.http_base_url,
        socket_url = %config.server.socket_url,
        page_size = config.chat.page_size,
        "Chat configuration loaded"
    );

    let api = Arc::new(HttpChatApi::with_timeout(
        &config.server.http_base_url,
        config.server.request_timeout(),
    )?);
    let (transport, events) =
        WsTransport::new(&config.server.socket_url, config.server.reconnect_delay());

    let session = ChatSession::new(
        config.chat.session_options(&user_id),
        Arc::<HttpChatApi>::clone(&api),
        api,
        Arc::new(transport),
    );

    let pump = session.clone();
    tokio::spawn(async move { pump.pump_events(events).await });
    tokio::spawn(render(session.clone()));

    if let Err(e) = session.initialize(&conversation_id).await {
        warn!(name: "chat.initialize_failed", error = %e, "Initial history load failed");
        eprintln!("could not load history: {e} (type /reload to retry)");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match line.trim() {
            "" => {}
            "/quit" => break,
            "/older" => match session.load_older_page().await {
                Ok(Some(page)) => eprintln!("loaded {} older messages", page.merged),
                Ok(None) => eprintln!("no older messages to load"),
                Err(e) => eprintln!("could not load older messages: {e}"),
            },
            "/reload" => {
                if let Err(e) = session.initialize(&conversation_id).await {
                    eprintln!("could not load history: {e}");
                }
            }
            "/retry" => retry_failed(&session).await,
            text => {
                if let Err(e) = session.submit_message(text, &user_id).await {
                    eprintln!("send failed: {e} (type /retry to re-send)");
                }
            }
        }
    }

    session.teardown().await;
    info!(name: "chat.exit", "Conversation closed");
    Ok(())
}

async fn retry_failed(session: &ChatSession) {
    let failed: Vec<Uuid> = session
        .snapshot()
        .await
        .into_iter()
        .filter(|m| m.status == MessageStatus::Failed)
        .map(|m| m.local_key)
        .collect();

    if failed.is_empty() {
        eprintln!("nothing to retry");
    }
    for local_key in failed {
        if let Err(e) = session.retry_failed(local_key).await {
            eprintln!("retry failed: {e}");
        }
    }
}

/// Print entries that are new or whose status changed since the last revision.
async fn render(session: ChatSession) {
    let mut revisions = session.subscribe();
    let mut printed: HashMap<Uuid, MessageStatus> = HashMap::new();

    while revisions.changed().await.is_ok() {
        for message in session.snapshot().await {
            if printed.get(&message.local_key) == Some(&message.status) {
                continue;
            }
            printed.insert(message.local_key, message.status);
            println!("{}", format_line(&message));
        }
    }
}

fn format_line(message: &Message) -> String {
    let time = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    let marker = match message.status {
        MessageStatus::Confirmed => "",
        MessageStatus::Pending => " (sending)",
        MessageStatus::Failed => " (failed)",
    };
    format!("[{time}] {}: {}{marker}", message.sender_id, message.text)
}
