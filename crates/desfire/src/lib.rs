//! Host-side driver for MIFARE DESFire EV1/EV2/EV3 cards
//!
//! This crate implements the application-level DESFire command set on top
//! of any [`CardTransport`](desfire_apdu_core::CardTransport): application
//! and file management, chunked reads and writes, value-file transactions,
//! the three authentication handshakes with their session-key derivations,
//! and secure key changes.
//!
//! The protocol plumbing lives in [`Transceiver`]: native-wrapped APDU
//! framing, Le-presence negotiation, multi-frame reassembly, and the
//! PN532-style escape fallback for readers that need it. [`Desfire`] is the
//! facade most callers use.
//!
//! ```no_run
//! use desfire::{Aid, Desfire};
//! # fn connect() -> desfire_apdu_core::transport::MockTransport { unimplemented!() }
//!
//! # fn main() -> desfire::Result<()> {
//! let mut card = Desfire::new(connect());
//! card.select_application(Aid::PICC)?;
//! let version = card.get_version()?;
//! println!("UID: {:02X?}", version.uid);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

pub mod auth;
pub mod card;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod session;
pub mod transceiver;
pub mod types;

pub use auth::AuthKind;
pub use card::Desfire;
pub use error::{Error, Result};
pub use keys::{FACTORY_KEY, KeyProvider, KeySet};
pub use session::SessionState;
pub use transceiver::Transceiver;
pub use types::{
    Access, AccessRights, Aid, CardVersion, FileSettings, KeySettings, KeyType,
    TransactionRecord, ValueFileSettings,
};

// Re-export the core layer the public API surfaces
pub use desfire_apdu_core::{Command, Response, StatusWord, transport::CardTransport};
