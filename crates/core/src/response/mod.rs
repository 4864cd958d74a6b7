//! APDU response definitions
//!
//! This module provides types for working with APDU responses according to
//! ISO/IEC 7816-4: the trailing two bytes are SW1/SW2, the preceding bytes
//! are the payload.

pub mod error;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use error::{ResponseError, StatusError};
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Parse a response from raw bytes (including status word)
    ///
    /// A response shorter than two bytes cannot carry a status word and is
    /// rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ResponseError> {
        let Some((payload, sw)) = data.split_last_chunk::<2>() else {
            return Err(ResponseError::Parse("response shorter than 2 bytes"));
        };

        let status = StatusWord::new(sw[0], sw[1]);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status,
        })
    }

    /// Get the response payload data
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out of the response
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if more frames follow
    pub const fn is_additional_frame(&self) -> bool {
        self.status.is_additional_frame()
    }

    /// Convert to a payload result, treating any non-success status as error
    pub fn into_bytes_result(self) -> Result<Bytes, StatusError> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(StatusError::new(self.status.sw1, self.status.sw2))
        }
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        let mut buf = BytesMut::with_capacity(response.payload.len() + 2);
        buf.put_slice(&response.payload);
        buf.put_u8(response.status.sw1);
        buf.put_u8(response.status.sw2);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_bytes() {
        let data = [0x01, 0x02, 0x03, 0x91, 0x00];
        let resp = Response::from_bytes(&data).unwrap();
        assert_eq!(resp.payload(), &[0x01, 0x02, 0x03]);
        assert_eq!(resp.status(), StatusWord::new(0x91, 0x00));
        assert!(resp.is_success());

        let data = [0x91, 0xAF];
        let resp = Response::from_bytes(&data).unwrap();
        assert_eq!(resp.payload(), &[]);
        assert!(resp.is_additional_frame());

        assert!(Response::from_bytes(&[0x91]).is_err());
        assert!(Response::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_response_into_result() {
        let resp = Response::from_bytes(&[0x0A, 0x91, 0x00]).unwrap();
        assert_eq!(resp.into_bytes_result().unwrap().as_ref(), &[0x0A]);

        let resp = Response::from_bytes(&[0x91, 0xF0]).unwrap();
        let err = resp.into_bytes_result().unwrap_err();
        assert_eq!(err.status_word().to_u16(), 0x91F0);
    }

    #[test]
    fn test_response_round_trip() {
        let resp = Response::new(Bytes::from_static(&[0xAA, 0xBB]), (0x91, 0xAF));
        let raw: Bytes = resp.clone().into();
        assert_eq!(raw.as_ref(), &[0xAA, 0xBB, 0x91, 0xAF]);
        assert_eq!(Response::from_bytes(&raw).unwrap(), resp);
    }
}
