use thiserror::Error;

/// Unified error type for channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    // Transport errors
    /// Failure raised by the WebSocket transport
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The configured server URL does not parse
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    /// The configured server URL cannot take path segments
    #[error("Endpoint URL cannot carry a path: '{0}'")]
    UrlNotBase(String),

    // Codec errors
    /// A frame was not valid JSON or its payload had the wrong shape
    #[error("Frame decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A frame carried a type tag outside the known set
    #[error("Unknown message type: '{0}'")]
    UnknownMessageType(String),

    // Lifecycle errors
    /// Connection requires both a user id and a session token
    #[error("User id and session token are required before connecting")]
    MissingIdentity,
}

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
