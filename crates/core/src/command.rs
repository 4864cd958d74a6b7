//! APDU command definitions
//!
//! This module provides the [`Command`] type used to build APDU commands
//! according to ISO/IEC 7816-4, including the DESFire native wrapping.

use bytes::{BufMut, Bytes, BytesMut};

/// Class byte used by DESFire native-wrapped commands
pub const CLA_DESFIRE: u8 = 0x90;

/// Error raised while building or parsing a command APDU
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The raw buffer does not describe any of the four APDU cases
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),
}

/// Generic APDU command structure
///
/// Covers the four ISO 7816-4 cases: header only, header + Le, header +
/// data, and header + data + Le. Lc and Le are single bytes (short APDUs);
/// DESFire never needs the extended forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte (the DESFire opcode under native wrapping)
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<u8>,
}

impl Command {
    /// Create a new command with just the header bytes (case 1)
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a DESFire native-wrapped command for the given opcode
    pub const fn desfire(opcode: u8) -> Self {
        Self::new(CLA_DESFIRE, opcode, 0x00, 0x00)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Drop the expected length field
    pub fn without_le(mut self) -> Self {
        self.le = None;
        self
    }

    /// Length of the serialized command
    pub fn command_length(&self) -> usize {
        let mut length = 4;
        if let Some(data) = &self.data {
            length += 1 + data.len();
        }
        if self.le.is_some() {
            length += 1;
        }
        length
    }

    /// Serialize to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < 4 {
            return Err(CommandError::InvalidLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);

        if data.len() > 4 {
            let lc = data[4] as usize;

            if data.len() == 5 {
                // Case 2: only Le present
                command.le = Some(data[4]);
            } else if data.len() >= 5 + lc {
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(&data[5..5 + lc]));
                }

                match data.len() - (5 + lc) {
                    0 => {}
                    1 => command.le = Some(data[5 + lc]),
                    _ => return Err(CommandError::InvalidLength(data.len())),
                }
            } else {
                return Err(CommandError::InvalidLength(data.len()));
            }
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case1_serialization() {
        let cmd = Command::desfire(0x60);
        assert_eq!(cmd.to_bytes().as_ref(), &[0x90, 0x60, 0x00, 0x00]);
        assert_eq!(cmd.command_length(), 4);
    }

    #[test]
    fn test_case2_serialization() {
        // Le = 0 must serialize as a trailing 0x00 byte
        let cmd = Command::desfire(0x60).with_le(0x00);
        assert_eq!(cmd.to_bytes().as_ref(), &[0x90, 0x60, 0x00, 0x00, 0x00]);
        assert_eq!(cmd.command_length(), 5);
    }

    #[test]
    fn test_case3_serialization() {
        let cmd = Command::desfire(0x5A).with_data(vec![0x10, 0x20, 0x30]);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            &[0x90, 0x5A, 0x00, 0x00, 0x03, 0x10, 0x20, 0x30]
        );
    }

    #[test]
    fn test_case4_serialization() {
        let cmd = Command::desfire(0x5A)
            .with_data(vec![0x10, 0x20, 0x30])
            .with_le(0x00);
        assert_eq!(
            cmd.to_bytes().as_ref(),
            &[0x90, 0x5A, 0x00, 0x00, 0x03, 0x10, 0x20, 0x30, 0x00]
        );
        assert_eq!(cmd.command_length(), 9);
    }

    #[test]
    fn test_command_from_bytes_round_trip() {
        for cmd in [
            Command::desfire(0x0A),
            Command::desfire(0x60).with_le(0x00),
            Command::desfire(0x5A).with_data(vec![0x01, 0x02, 0x03]),
            Command::desfire(0xBD).with_data(vec![0x01, 0x02, 0x03]).with_le(0x00),
        ] {
            let parsed = Command::from_bytes(&cmd.to_bytes()).unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn test_command_from_bytes_invalid() {
        assert!(Command::from_bytes(&[0x90, 0x60]).is_err());
        // Lc claims more data than present
        assert!(Command::from_bytes(&[0x90, 0x3D, 0x00, 0x00, 0x08, 0x01]).is_err());
        // Two trailing bytes after the data field
        assert!(Command::from_bytes(&[0x90, 0x3D, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00]).is_err());
    }
}
