//! Error types for the voice streaming engine

use thiserror::Error;

/// Result type alias for voxlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice streaming engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone or output device could not be acquired
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio stream error after the device was acquired
    #[error("audio error: {0}")]
    Audio(String),

    /// Connection handshake failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Established connection was lost mid-session
    #[error("connection dropped: {0}")]
    ConnectionDropped(String),

    /// Inbound envelope could not be decoded
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A session is live or its grace window has not elapsed
    #[error("session busy: {0}")]
    SessionBusy(String),

    /// Conversation service rejected a request
    #[error("conversation service error: {0}")]
    Service(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error ends the session it occurred in
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::MalformedMessage(_))
    }
}
