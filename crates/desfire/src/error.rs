//! Error types for DESFire operations

use desfire_apdu_core::StatusWord;
use desfire_apdu_core::prelude::{ResponseError, TransportError};
use thiserror::Error;

use crate::crypto::CryptoError;

/// Result type for DESFire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for DESFire operations
///
/// Card-reported failures carry the raw SW1/SW2 pair so callers can log the
/// two hex digits alongside the classified kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Reader I/O failure or empty response
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response could not be parsed
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Cryptographic primitive rejected its input
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A cryptogram from the card had the wrong length
    ///
    /// Short RndB or RndA' frames abort the handshake with this kind.
    #[error("Unexpected cryptogram length {len}, expected {expected}")]
    CryptoLength {
        /// Received length
        len: usize,
        /// Required length
        expected: usize,
    },

    /// Unexpected frame structure or sequence
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The card rejected both Le forms of the command ({status})
    #[error("Length error after exhausting both Le forms ({status})")]
    LengthMismatch {
        /// Status word of the final attempt
        status: StatusWord,
    },

    /// The decrypted card challenge did not match the expected rotation
    #[error("Authentication failed: card challenge mismatch")]
    AuthMismatch,

    /// The card rejected the authentication ({status})
    #[error("Authentication failed ({status})")]
    AuthFailed {
        /// Card status word
        status: StatusWord,
    },

    /// The session lacks the rights for this operation ({status})
    #[error("Permission denied ({status})")]
    PermissionDenied {
        /// Card status word
        status: StatusWord,
    },

    /// Application or file not found ({status})
    #[error("Not found ({status})")]
    NotFound {
        /// Card status word
        status: StatusWord,
    },

    /// An object with this identifier already exists ({status})
    #[error("Duplicate ({status})")]
    Duplicate {
        /// Card status word
        status: StatusWord,
    },

    /// The card is out of NV memory ({status})
    #[error("Out of memory ({status})")]
    OutOfMemory {
        /// Card status word
        status: StatusWord,
    },

    /// Data integrity failure reported by the card ({status})
    #[error("Integrity error ({status})")]
    Integrity {
        /// Card status word
        status: StatusWord,
    },

    /// Value operation crossed a file limit ({status})
    #[error("Boundary error ({status})")]
    Boundary {
        /// Card status word
        status: StatusWord,
    },

    /// The card aborted the current transaction ({status})
    #[error("Aborted ({status})")]
    Aborted {
        /// Card status word
        status: StatusWord,
    },

    /// The card does not know this command ({status})
    #[error("Illegal command ({status})")]
    IllegalCommand {
        /// Card status word
        status: StatusWord,
    },

    /// A session-dependent operation was invoked without a session
    #[error("Operation requires an authenticated session")]
    NotAuthenticated,

    /// Any other card status the taxonomy does not classify
    #[error("Card returned status {status} ({})", status.description())]
    CardStatus {
        /// Card status word
        status: StatusWord,
    },
}

impl Error {
    /// Classify a non-success card status word
    pub fn from_status(status: StatusWord) -> Self {
        match (status.sw1, status.sw2) {
            (0x91, 0x7E) | (0x91, 0xA1) => Self::LengthMismatch { status },
            (0x91, 0xAE) => Self::AuthFailed { status },
            (0x91, 0x9D) => Self::PermissionDenied { status },
            (0x91, 0xA0) | (0x91, 0xF0) | (0x6A, 0x82) => Self::NotFound { status },
            (0x91, 0xDE) => Self::Duplicate { status },
            (0x91, 0x0E) | (0x91, 0x9C) => Self::OutOfMemory { status },
            (0x91, 0x1E) | (0x91, 0xC1) | (0x91, 0xF1) | (0x91, 0xFE) => {
                Self::Integrity { status }
            }
            (0x91, 0xBE) => Self::Boundary { status },
            (0x91, 0xCA) => Self::Aborted { status },
            (0x91, 0x1C) | (0x91, 0x9E) | (0x6D, 0x00) => Self::IllegalCommand { status },
            _ => Self::CardStatus { status },
        }
    }

    /// Get the card status word if this error carries one
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::LengthMismatch { status }
            | Self::AuthFailed { status }
            | Self::PermissionDenied { status }
            | Self::NotFound { status }
            | Self::Duplicate { status }
            | Self::OutOfMemory { status }
            | Self::Integrity { status }
            | Self::Boundary { status }
            | Self::Aborted { status }
            | Self::IllegalCommand { status }
            | Self::CardStatus { status } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0xF0)),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x6A, 0x82)),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0xAE)),
            Error::AuthFailed { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0xDE)),
            Error::Duplicate { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0xBE)),
            Error::Boundary { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0xCA)),
            Error::Aborted { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x6D, 0x00)),
            Error::IllegalCommand { .. }
        ));
        assert!(matches!(
            Error::from_status(StatusWord::new(0x91, 0x77)),
            Error::CardStatus { .. }
        ));
    }

    #[test]
    fn test_status_word_carried() {
        let err = Error::from_status(StatusWord::new(0x91, 0x9D));
        assert_eq!(err.status_word(), Some(StatusWord::new(0x91, 0x9D)));
        assert_eq!(err.to_string(), "Permission denied (91 9D)");

        assert_eq!(Error::NotAuthenticated.status_word(), None);
    }
}
