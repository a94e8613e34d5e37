use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::reconciler::DEFAULT_PAGE_SIZE;
use crate::session::{DEFAULT_SCROLL_THRESHOLD_PX, SessionOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Base URL of the chat HTTP API
    #[arg(long, env = "CHAT_HTTP_BASE_URL")]
    pub http_base_url: Option<String>,

    /// WebSocket URL of the live transport
    #[arg(long, env = "CHAT_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Local user id
    #[arg(long, env = "CHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Conversation to open
    #[arg(long, env = "CHAT_CONVERSATION_ID")]
    pub conversation_id: Option<String>,

    /// Messages per history page
    #[arg(long, env = "CHAT_PAGE_SIZE")]
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub http_base_url: String,
    pub socket_url: String,
    pub request_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub page_size: usize,
    pub scroll_threshold_px: f64,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl ChatConfig {
    /// Session options for `user_id`.
    pub fn session_options(&self, user_id: impl Into<String>) -> SessionOptions {
        SessionOptions::new(user_id)
            .with_page_size(self.page_size)
            .with_scroll_threshold(self.scroll_threshold_px)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.http_base_url", "http://localhost:3007")?
            .set_default("server.socket_url", "ws://localhost:3005")?
            .set_default("server.request_timeout_ms", 10_000)?
            .set_default("server.reconnect_delay_ms", 2_000)?
            .set_default("chat.page_size", DEFAULT_PAGE_SIZE as u64)?
            .set_default("chat.scroll_threshold_px", DEFAULT_SCROLL_THRESHOLD_PX)?;

        // 2. Config file: explicit path must exist, ./config.* is optional
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment (e.g. CHAT_SERVER__SOCKET_URL=ws://chat:3005)
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags and their env vars win
        if let Some(url) = cli.http_base_url {
            builder = builder.set_override("server.http_base_url", url)?;
        }
        if let Some(url) = cli.socket_url {
            builder = builder.set_override("server.socket_url", url)?;
        }
        if let Some(user_id) = cli.user_id {
            builder = builder.set_override("chat.user_id", user_id)?;
        }
        if let Some(conversation_id) = cli.conversation_id {
            builder = builder.set_override("chat.conversation_id", conversation_id)?;
        }
        if let Some(page_size) = cli.page_size {
            builder = builder.set_override("chat.page_size", page_size as u64)?;
        }

        let cfg = builder.build()?;
        let config: Self = cfg.try_deserialize()?;

        if config.chat.page_size == 0 {
            return Err(config::ConfigError::Message(
                "chat.page_size must be greater than zero".into(),
            ));
        }
        Ok(config)
    }
}
