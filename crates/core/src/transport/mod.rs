//! Transport traits for APDU communication with cards
//!
//! A transport is responsible for sending and receiving raw APDU bytes. It
//! has no knowledge of command structure or protocol details. Reader quirks
//! are surfaced as plain capability hints, never as subtypes: a backend that
//! owns an escape channel reports it through [`CardTransport::supports_escape`]
//! and the engine decides when to use it.

pub mod error;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for basic card transports
pub trait CardTransport: Send + Sync + fmt::Debug {
    /// Send raw APDU bytes to the card and return response bytes
    ///
    /// This is the lowest level transmission method and only deals with raw
    /// bytes.
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = ?hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = ?hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Whether this reader exposes a CCID escape channel
    ///
    /// Escape is a fallback used by the engine when the regular transmit
    /// path returns nothing; most readers never need it.
    fn supports_escape(&self) -> bool {
        false
    }

    /// Send a payload over the reader's escape channel
    ///
    /// The payload is the inner frame (a bare APDU or a PN532 command); the
    /// backend adds whatever pseudo-APDU or control wrapping its driver
    /// requires.
    fn escape(&mut self, payload: &[u8]) -> Result<Bytes, TransportError> {
        let _ = payload;
        Err(TransportError::Unsupported)
    }

    /// Force ISO-DEP (ISO 14443-4) activation if the reader left the card
    /// in a lower layer
    ///
    /// Backends without the concept simply succeed.
    fn ensure_iso_dep(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<(), TransportError>;
}

/// Scripted transport returning canned responses, for tests
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// Mock responses to return, in order
    pub responses: Vec<Bytes>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Escape payloads that were sent
    pub escapes: Vec<Bytes>,
    /// Responses served over the escape channel
    pub escape_responses: Vec<Bytes>,
    /// Whether the escape channel is advertised
    pub escape_capable: bool,
}

#[cfg(any(test, feature = "mock"))]
impl MockTransport {
    /// Create a new mock transport with the given responses
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            ..Self::default()
        }
    }

    /// Create a new mock transport that always returns the given response
    pub fn with_response(response: impl Into<Bytes>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a new mock transport that always returns `91 00`
    pub fn with_success() -> Self {
        Self::with_response(Bytes::from_static(&[0x91, 0x00]))
    }
}

#[cfg(any(test, feature = "mock"))]
impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.commands.push(Bytes::copy_from_slice(command));

        if self.responses.is_empty() {
            return Err(TransportError::Transmission);
        }

        // Either clone the single response or take the next one
        if self.responses.len() == 1 {
            Ok(self.responses[0].clone())
        } else {
            Ok(self.responses.remove(0))
        }
    }

    fn supports_escape(&self) -> bool {
        self.escape_capable
    }

    fn escape(&mut self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if !self.escape_capable {
            return Err(TransportError::Unsupported);
        }

        self.escapes.push(Bytes::copy_from_slice(payload));

        if self.escape_responses.is_empty() {
            return Err(TransportError::Transmission);
        }

        if self.escape_responses.len() == 1 {
            Ok(self.escape_responses[0].clone())
        } else {
            Ok(self.escape_responses.remove(0))
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.commands.clear();
        self.escapes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transport_sequencing() {
        let mut transport = MockTransport::new(vec![
            Bytes::from_static(&[0x01, 0x91, 0xAF]),
            Bytes::from_static(&[0x02, 0x91, 0x00]),
        ]);

        assert_eq!(
            transport.transmit_raw(&[0x90, 0x60, 0x00, 0x00]).unwrap(),
            Bytes::from_static(&[0x01, 0x91, 0xAF])
        );
        assert_eq!(
            transport.transmit_raw(&[0x90, 0xAF, 0x00, 0x00]).unwrap(),
            Bytes::from_static(&[0x02, 0x91, 0x00])
        );
        // The last response keeps repeating
        assert_eq!(
            transport.transmit_raw(&[0x90, 0xAF, 0x00, 0x00]).unwrap(),
            Bytes::from_static(&[0x02, 0x91, 0x00])
        );
        assert_eq!(transport.commands.len(), 3);
    }

    #[test]
    fn test_mock_transport_escape_gating() {
        let mut transport = MockTransport::with_success();
        assert!(!transport.supports_escape());
        assert!(matches!(
            transport.escape(&[0xD4, 0x42]),
            Err(TransportError::Unsupported)
        ));
    }
}
