//! Error types for the Nexus voice client

use thiserror::Error;

/// Result type alias for Nexus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Nexus voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, bad environment)
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture/output device unavailable or permission denied
    #[error("device error: {0}")]
    Device(String),

    /// Malformed inbound wire payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Remote session failure (channel closed, send rejected)
    #[error("session error: {0}")]
    Session(String),

    /// Local audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
