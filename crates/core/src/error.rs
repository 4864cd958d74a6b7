//! Unified error type for APDU operations

use thiserror::Error;

use crate::response::status::StatusWord;

/// The main error type for APDU operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-related errors
    #[error(transparent)]
    Transport(#[from] crate::transport::error::TransportError),

    /// Command-related errors
    #[error(transparent)]
    Command(#[from] crate::command::CommandError),

    /// Response-related errors
    #[error(transparent)]
    Response(#[from] crate::response::error::ResponseError),

    /// Status errors (for status words)
    #[error(transparent)]
    Status(#[from] crate::response::error::StatusError),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(&'static str),

    /// Other errors with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new error with the given status word
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::Status(crate::response::error::StatusError::new(sw1, sw2))
    }

    /// Get the status word if this is a status error
    pub const fn status_word(&self) -> Option<StatusWord> {
        if let Self::Status(status_error) = self {
            Some(status_error.status_word())
        } else {
            None
        }
    }

    /// Create a generic other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}

/// Result type for APDU operations
pub type Result<T> = core::result::Result<T, Error>;
