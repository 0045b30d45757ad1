//! Chatmesh Error Types

use thiserror::Error;

/// Result type alias for chatmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// Chatmesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // Wire protocol errors
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("Frame checksum mismatch")]
    ChecksumMismatch,

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Membership errors
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Invalid peer address: {0}")]
    InvalidPeerAddress(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }
}
