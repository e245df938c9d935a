//! Error types for the Pi agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Pi agent
///
/// Command-level failures never show up here; they are converted into
/// outbound error events by the dispatcher
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (detected at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Control server unreachable or handshake failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Event channel error (framing, send failures)
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed endpoint URL
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
