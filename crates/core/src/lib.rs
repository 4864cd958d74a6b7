//! Core types for DESFire native-wrapped APDU exchange
//!
//! This crate provides the foundation shared by the DESFire engine and the
//! reader transports:
//!
//! - Building and parsing ISO/IEC 7816-4 command APDUs (cases 1 to 4)
//! - Response parsing and DESFire status-word classification
//! - The [`CardTransport`] trait implemented by reader backends, including
//!   the optional escape-channel capabilities some contactless readers need
//!
//! The DESFire native wrapping fixes CLA to `0x90`, carries the command
//! opcode in INS, and zeroes P1/P2; multi-frame exchanges continue under the
//! `0xAF` (ADDITIONAL_FRAME) opcode.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod response;
pub mod transport;

// Core error types
mod error;
pub use error::{Error, Result};

// Re-exports for common types
pub use command::{Command, CommandError};
pub use response::status::StatusWord;
pub use response::Response;
pub use transport::CardTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Response, Result,
        response::error::{ResponseError, StatusError},
        response::status::StatusWord,
        transport::{CardTransport, TransportError},
    };
}
