//! Conversation session driver.
//!
//! [`ChatSession`] runs the asynchronous halves of the reconciler's
//! operations against real collaborators and publishes a revision counter
//! that a UI can watch to re-render the read-only message list.
//!
//! # Architecture
//!
//! - [`ChatSession`]: shared handle over one reconciler and its collaborators
//! - [`SessionOptions`]: user id, page size and scroll threshold
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chat_stream::session::{ChatSession, SessionOptions};
//! use chat_stream::{HttpChatApi, WsTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpChatApi::new("http://localhost:3007")?);
//! let (transport, events) = WsTransport::new("ws://localhost:3007/ws", Duration::from_secs(2));
//!
//! let session = ChatSession::new(
//!     SessionOptions::new("u1"),
//!     Arc::<HttpChatApi>::clone(&api),
//!     api,
//!     Arc::new(transport),
//! );
//! let pump = session.clone();
//! tokio::spawn(async move { pump.pump_events(events).await });
//!
//! session.initialize("c1").await?;
//! session.submit_message("hello", "u1").await?;
//! # Ok(())
//! # }
//! ```

mod chat;

pub use chat::{ChatSession, DEFAULT_SCROLL_THRESHOLD_PX, SessionOptions};
