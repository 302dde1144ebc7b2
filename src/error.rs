//! Error types for NexusHome

use thiserror::Error;

/// Result type alias for NexusHome operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the NexusHome core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, unreadable config)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access refused by the platform
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// PCM encode/decode error
    #[error("codec error: {0}")]
    Codec(String),

    /// Handshake or mid-session network failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed message from the remote endpoint
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool call could not be executed
    #[error("tool execution error: {0}")]
    ToolExecution(String),

    /// One or more teardown steps failed
    #[error("resource release error: {0}")]
    ResourceRelease(String),

    /// A voice session is already running
    #[error("a voice session is already active")]
    SessionActive,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error should be shown to the user as a notification
    ///
    /// Tool execution failures are answered to the model instead and
    /// teardown failures are only logged.
    #[must_use]
    pub const fn is_user_visible(&self) -> bool {
        !matches!(self, Self::ToolExecution(_) | Self::ResourceRelease(_))
    }
}
