//! Error types for the chat stream core and its collaborators.

use thiserror::Error;

/// Errors raised by the I/O collaborators (HTTP API and live transport).
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// WebSocket handshake or frame error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The live transport has no open connection.
    #[error("Transport is not connected")]
    NotConnected,
}

/// Errors surfaced by the stream reconciler.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// History or pagination fetch failed. Recoverable; state is untouched.
    #[error("history fetch failed: {source}")]
    FetchFailed {
        #[source]
        source: ApiError,
    },

    /// Inbound push lacked a required field and was dropped.
    #[error("malformed push: missing {missing}")]
    MalformedPush {
        /// Name of the first missing field.
        missing: &'static str,
    },

    /// Durable send was rejected; the pending entry is kept and flagged.
    #[error("durable send failed: {source}")]
    SendFailed {
        #[source]
        source: ApiError,
    },

    /// Result arrived after teardown or a conversation switch.
    #[error("stale event discarded")]
    StaleEvent,

    /// Operation called before `initialize`.
    #[error("reconciler is not initialized")]
    NotInitialized,

    /// Caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Result type alias for collaborator calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
