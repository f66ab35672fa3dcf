//! Error types for the chat relay.

/// Top-level error type for the chat relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Speech engine error.
    #[error("speech error: {0}")]
    Speech(String),

    /// Forwarding service error.
    #[error("forward error: {0}")]
    Forward(String),

    /// Control protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;
