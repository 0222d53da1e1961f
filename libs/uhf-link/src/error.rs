//! Link Error Types
//!
//! Fatal and usage errors raised by transports and reader sessions.
//! Framing problems are not errors here: see [`crate::codec::FramingError`].

use thiserror::Error;

/// Result type for uhf-link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Reader link errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transport could not be opened (host unreachable, device missing)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command issued on a session that is not connected
    #[error("Not connected")]
    NotConnected,

    /// Command issued while another command is still in flight
    #[error("Session busy: {0}")]
    Busy(String),

    /// IO errors on an open transport
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid data supplied by the caller
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

impl From<tokio_serial::Error> for LinkError {
    fn from(err: tokio_serial::Error) -> Self {
        LinkError::Connection(err.to_string())
    }
}

impl LinkError {
    pub fn connection(msg: impl Into<String>) -> Self {
        LinkError::Connection(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        LinkError::Io(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        LinkError::Timeout(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LinkError::Config(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        LinkError::InvalidData(msg.into())
    }

    /// Check if this error indicates the link is gone and needs a reconnect
    pub fn needs_reconnect(&self) -> bool {
        match self {
            LinkError::Io(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Connection aborted")
                    || msg.contains("Network is unreachable")
                    || msg.contains("closed")
            },
            LinkError::Connection(_) => true,
            LinkError::NotConnected => true,
            _ => false,
        }
    }
}
