//! Transmit engine
//!
//! Sits between the operations and the raw transport. For every logical
//! command it negotiates Le presence with the card, retries once on a
//! transport failure, falls back to the reader escape channel when the
//! regular path yields nothing, and reassembles multi-frame responses
//! behind ADDITIONAL_FRAME. Callers of [`Transceiver::execute`] see one
//! accumulated payload; callers of [`Transceiver::transmit`] see
//! continuation statuses explicitly.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use desfire_apdu_core::prelude::*;
use tracing::{debug, trace, warn};

use crate::constants::{MAX_FRAME_DATA, ins, pn532};
use crate::error::{Error, Result};

/// Wait before the single transport-level retry
const RETRY_DELAY: Duration = Duration::from_millis(80);

/// Upper bound on continuation frames for one logical command
const MAX_CHAIN: usize = 256;

/// Transmit engine wrapping a card transport
#[derive(Debug)]
pub struct Transceiver<T: CardTransport> {
    transport: T,
    /// Learned Le preference; sticky for the rest of the session
    prefer_no_le: bool,
}

impl<T: CardTransport> Transceiver<T> {
    /// Wrap a transport; the initial Le preference is to omit the byte
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            prefer_no_le: true,
        }
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the engine and return the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Current Le preference
    pub const fn prefers_no_le(&self) -> bool {
        self.prefer_no_le
    }

    fn frame_for(command: &Command, with_le: bool) -> Command {
        if with_le {
            command.clone().with_le(0x00)
        } else {
            command.clone().without_le()
        }
    }

    /// Transmit, retrying once after a short pause on transport failure
    fn send_raw(&mut self, frame: &[u8]) -> Result<Bytes> {
        match self.transport.transmit_raw(frame) {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!(%error, "Transport failure, retrying once");
                std::thread::sleep(RETRY_DELAY);
                Ok(self.transport.transmit_raw(frame)?)
            }
        }
    }

    /// Send one logical command, negotiating the Le form
    ///
    /// Success and continuation responses update the Le preference. Length
    /// errors are retried with the opposite form and surface as
    /// [`Error::LengthMismatch`] only when both forms fail. Any other card
    /// status is returned unmapped for the caller to judge.
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        let mut length_error = None;
        let mut short_response = false;

        let first_with_le = !self.prefer_no_le;
        for with_le in [first_with_le, !first_with_le] {
            let frame = Self::frame_for(command, with_le).to_bytes();
            let raw = self.send_raw(&frame)?;

            if raw.len() < 2 {
                debug!(len = raw.len(), "Response too short to carry a status word");
                short_response = true;
                continue;
            }

            let response = Response::from_bytes(&raw)?;
            let status = response.status();

            if status.is_length_error() {
                trace!(%status, with_le, "Length error, toggling Le form");
                length_error = Some(status);
                continue;
            }

            if response.is_success() || response.is_additional_frame() {
                self.prefer_no_le = !with_le;
            }
            return Ok(response);
        }

        if short_response {
            return self.recover_empty(command);
        }

        let status = length_error.expect("either short response or length error");
        Err(Error::LengthMismatch { status })
    }

    /// Last-resort recovery when the reader returned nothing
    ///
    /// ACR122U-class readers sometimes swallow native frames; the escape
    /// ladder pushes the same APDU through the raw escape channel and the
    /// two PN532 wrappings.
    fn recover_empty(&mut self, command: &Command) -> Result<Response> {
        let apdu = Self::frame_for(command, !self.prefer_no_le).to_bytes();

        if self.transport.supports_escape() {
            debug!("Empty response, falling back to the reader escape channel");
            if let Err(error) = self.transport.ensure_iso_dep() {
                trace!(%error, "ISO-DEP activation hook failed");
            }

            if let Ok(raw) = self.transport.escape(&apdu) {
                if raw.len() >= 2 {
                    return Ok(Response::from_bytes(&raw)?);
                }
            }

            for (request_header, response_header) in [
                (&pn532::DATA_EXCHANGE[..], &pn532::DATA_EXCHANGE_OK[..]),
                (&pn532::COMMUNICATE_THRU[..], &pn532::COMMUNICATE_THRU_OK[..]),
            ] {
                let mut wrapped = Vec::with_capacity(request_header.len() + apdu.len());
                wrapped.extend_from_slice(request_header);
                wrapped.extend_from_slice(&apdu);

                let Ok(raw) = self.transport.escape(&wrapped) else {
                    continue;
                };
                if let Some(inner) = raw.strip_prefix(response_header) {
                    if inner.len() >= 2 {
                        return Ok(Response::from_bytes(inner)?);
                    }
                }
            }

            return Err(TransportError::other("no response through the escape channel").into());
        }

        // No escape channel: toggle the Le form one last time
        let raw = self.send_raw(&apdu)?;
        if raw.len() < 2 {
            return Err(TransportError::other("card returned an empty response").into());
        }
        Ok(Response::from_bytes(&raw)?)
    }

    /// Execute a command and reassemble the full response payload
    ///
    /// Continuation frames are fetched with ADDITIONAL_FRAME and their
    /// payloads concatenated; any terminal non-success status maps through
    /// the error taxonomy.
    pub fn execute(&mut self, command: Command) -> Result<Bytes> {
        let mut response = self.transmit(&command)?;
        let mut payload = BytesMut::from(response.payload());

        let mut frames = 0usize;
        while response.is_additional_frame() {
            frames += 1;
            if frames > MAX_CHAIN {
                return Err(Error::Protocol("continuation chain exceeds frame budget"));
            }
            response = self.transmit(&Command::desfire(ins::ADDITIONAL_FRAME))?;
            payload.extend_from_slice(response.payload());
        }

        if response.is_success() {
            Ok(payload.freeze())
        } else {
            Err(Error::from_status(response.status()))
        }
    }

    /// Execute a long write, chunking the data across frames
    ///
    /// The lead frame carries the operation header and the first chunk;
    /// the rest follows under ADDITIONAL_FRAME while the card answers
    /// `91 AF`.
    pub fn execute_write(&mut self, opcode: u8, header: &[u8], data: &[u8]) -> Result<()> {
        let mut chunks = data.chunks(MAX_FRAME_DATA);
        let first = chunks.next().unwrap_or_default();

        let mut lead = Vec::with_capacity(header.len() + first.len());
        lead.extend_from_slice(header);
        lead.extend_from_slice(first);

        let mut response = self.transmit(&Command::desfire(opcode).with_data(lead))?;

        for chunk in chunks {
            if response.is_success() {
                return Err(Error::Protocol("card ended the write before all data was sent"));
            }
            if !response.is_additional_frame() {
                return Err(Error::from_status(response.status()));
            }
            response = self
                .transmit(&Command::desfire(ins::ADDITIONAL_FRAME).with_data(chunk.to_vec()))?;
        }

        if response.is_success() {
            Ok(())
        } else if response.is_additional_frame() {
            Err(Error::Protocol("card kept requesting frames after the final chunk"))
        } else {
            Err(Error::from_status(response.status()))
        }
    }
}
