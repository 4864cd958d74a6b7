//! PC/SC transport implementation

use std::ffi::CString;
use std::fmt;

use desfire_apdu_core::Bytes;
use desfire_apdu_core::transport::{CardTransport, TransportError};
use pcsc::{Card, Context, Disposition, Scope};
use tracing::{debug, trace, warn};

use crate::{config::PcscConfig, error::PcscError};

/// CCID escape control function, SCARD_CTL_CODE(3500)
const ESCAPE_FUNCTION: u64 = 3500;

/// Pseudo-APDU header carrying an escape payload on ACR122U readers
const ESCAPE_HEADER: [u8; 4] = [0xFF, 0x00, 0x00, 0x00];

/// PN532 InCommunicateThru wrapping of a RATS, forcing ISO-DEP activation
const ISO_DEP_ACTIVATE: [u8; 4] = [0xD4, 0x42, 0xE0, 0x50];

/// How a frame reaches the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    /// Regular card I/O
    Transmit,
    /// CCID escape (vendor control) channel
    Escape,
}

/// Transport implementation using PC/SC
///
/// The card handle is attached lazily: construction never talks to the
/// reader, and a stale handle (card reset or removed) is dropped and, for
/// resets, re-attached once within the same exchange when
/// [`PcscConfig::auto_reconnect`] allows it. The escape channel goes
/// through the same exchange path, so it inherits the identical recovery
/// behavior.
pub struct PcscTransport {
    /// PC/SC context
    context: Context,
    /// Card connection, attached on first use
    card: Option<Card>,
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
    /// Reader identity hint enabling the escape channel
    is_acr122u: bool,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("is_acr122u", &self.is_acr122u)
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Create a transport for the named reader
    ///
    /// No connection is made yet; the first exchange attaches the card.
    pub fn new(context: Context, reader_name: &str, config: PcscConfig) -> Self {
        Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            config,
            is_acr122u: reader_name.contains("ACR122"),
        }
    }

    /// Establish a context and open the named reader
    pub fn open(reader_name: &str, config: PcscConfig) -> Result<Self, PcscError> {
        Ok(Self::new(Context::establish(Scope::User)?, reader_name, config))
    }

    /// Establish a context and open the first available reader
    pub fn open_first(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;

        let mut readers_buffer = [0; 2048];
        let reader = context
            .list_readers(&mut readers_buffer)?
            .next()
            .ok_or(PcscError::NoReadersAvailable)?
            .to_string_lossy()
            .into_owned();

        debug!(reader = %reader, "Using first available reader");
        Ok(Self::new(context, &reader, config))
    }

    /// Open a fresh connection to the card in this reader
    fn connect(&self) -> Result<Card, PcscError> {
        let name = CString::new(self.reader_name.as_str())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

        match self
            .context
            .connect(&name, self.config.share_mode.into(), self.config.protocols)
        {
            Ok(card) => Ok(card),
            Err(pcsc::Error::NoSmartcard) => Err(PcscError::NoCard(self.reader_name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the attached card handle, connecting if there is none
    fn attach(&mut self) -> Result<&mut Card, PcscError> {
        if self.card.is_none() {
            self.card = Some(self.connect()?);
            debug!(reader = %self.reader_name, "Attached to card");
        }
        match self.card.as_mut() {
            Some(card) => Ok(card),
            None => Err(PcscError::NoCard(self.reader_name.clone())),
        }
    }

    /// Release the card handle, if any
    fn detach(&mut self, disposition: Disposition) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(disposition);
        }
    }

    /// Run one frame through the reader, recovering a reset card once
    ///
    /// Both channels share this path: a reset or removed card invalidates
    /// the handle, and a reset is retried once on a fresh attachment when
    /// the configuration allows automatic reconnects.
    fn exchange(&mut self, channel: Channel, frame: &[u8]) -> Result<Bytes, PcscError> {
        let mut reattached = false;
        loop {
            let outcome = {
                let card = self.attach()?;
                let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
                match channel {
                    Channel::Transmit => {
                        card.transmit(frame, &mut buffer).map(Bytes::copy_from_slice)
                    }
                    Channel::Escape => card
                        .control(pcsc::ctl_code(ESCAPE_FUNCTION), frame, &mut buffer)
                        .map(Bytes::copy_from_slice),
                }
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(e @ (pcsc::Error::ResetCard | pcsc::Error::RemovedCard)) => {
                    // The handle is stale either way
                    self.detach(Disposition::LeaveCard);

                    let recoverable = e == pcsc::Error::ResetCard
                        && self.config.auto_reconnect
                        && !reattached;
                    if !recoverable {
                        return Err(e.into());
                    }
                    debug!(reader = %self.reader_name, "Card was reset, re-attaching");
                    reattached = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wrap an escape payload in the reader's pseudo-APDU
    fn escape_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ESCAPE_HEADER.len() + 1 + payload.len());
        frame.extend_from_slice(&ESCAPE_HEADER);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        frame
    }

    /// Get the ATR of the attached card
    pub fn atr(&self) -> Result<Vec<u8>, PcscError> {
        match &self.card {
            Some(card) => Ok(card.get_attribute_owned(pcsc::Attribute::AtrString)?),
            None => Err(PcscError::NoCard(self.reader_name.clone())),
        }
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Whether this reader advertises the ACR122U escape channel
    pub const fn is_acr122u(&self) -> bool {
        self.is_acr122u
    }
}

impl CardTransport for PcscTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        self.exchange(Channel::Transmit, command)
            .map_err(TransportError::from)
    }

    fn supports_escape(&self) -> bool {
        self.is_acr122u
    }

    fn escape(&mut self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if !self.is_acr122u {
            return Err(TransportError::Unsupported);
        }

        let frame = Self::escape_frame(payload);
        trace!(frame = ?hex::encode(&frame), "Escape frame");

        let response = self
            .exchange(Channel::Escape, &frame)
            .map_err(TransportError::from)?;
        trace!(response = ?hex::encode(&response), "Escape response");
        Ok(response)
    }

    fn ensure_iso_dep(&mut self) -> Result<(), TransportError> {
        if !self.is_acr122u {
            return Ok(());
        }
        // Activation is best effort; the card may already be in ISO-DEP
        if let Err(error) = self.escape(&ISO_DEP_ACTIVATE) {
            warn!(%error, "ISO-DEP activation failed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.detach(Disposition::ResetCard);
        self.attach().map(|_| ()).map_err(TransportError::from)
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        self.detach(Disposition::LeaveCard);
    }
}
