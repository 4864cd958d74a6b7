//! PC/SC transport for the DESFire engine
//!
//! Implements [`CardTransport`](desfire_apdu_core::CardTransport) on top of
//! the system PC/SC stack. ACR122U-class readers additionally expose the
//! CCID escape channel the engine uses as a fallback for native DESFire
//! frames, including PN532 pass-through and one-shot ISO-DEP activation.

pub mod config;
pub mod error;
pub mod transport;

pub use config::{PcscConfig, ShareMode};
pub use error::PcscError;
pub use transport::PcscTransport;
