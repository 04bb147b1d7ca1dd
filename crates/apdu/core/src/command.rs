//! APDU command definitions
//!
//! Commands are built as ISO/IEC 7816-4 APDUs. Payloads up to 255 bytes use the
//! short form; longer payloads switch to the extended form (`00 Lc1 Lc2`).

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Largest payload that fits a short APDU
pub const SHORT_MAX_DATA: usize = 255;

/// Largest payload that fits an extended APDU
pub const EXTENDED_MAX_DATA: usize = 65_535;

/// ISO/IEC 7816-4 command chaining bit in the CLA byte
pub const CLA_CHAINING: u8 = 0x10;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
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
    /// Create a new command with just the header bytes
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

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
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

    /// Mark this command as a non-final link of an ISO command chain
    pub const fn chained(mut self) -> Self {
        self.cla |= CLA_CHAINING;
        self
    }

    /// Whether the payload requires the extended length form
    pub fn is_extended(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.len() > SHORT_MAX_DATA)
    }

    /// Serialize to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data_len = self.data.as_ref().map_or(0, |d| d.len());
        if data_len > EXTENDED_MAX_DATA {
            return Err(Error::DataTooLong(data_len));
        }

        let mut buffer = BytesMut::with_capacity(4 + 3 + data_len + 2);
        buffer.put_slice(&[self.cla, self.ins, self.p1, self.p2]);

        let extended = self.is_extended();
        if let Some(data) = &self.data {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            if extended {
                buffer.put_u16(u16::from(le));
            } else {
                buffer.put_u8(le);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a short-form command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        if data.len() == 4 {
            return Ok(command);
        }

        let lc = data[4] as usize;
        if data.len() == 5 {
            command.le = Some(data[4]);
        } else if data.len() == 5 + lc {
            command.data = Some(Bytes::copy_from_slice(&data[5..]));
        } else if data.len() == 6 + lc {
            command.data = Some(Bytes::copy_from_slice(&data[5..5 + lc]));
            command.le = Some(data[5 + lc]);
        } else {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let cmd = Command::new_with_data(0x00, 0xA4, 0x04, 0x00, hex!("A00000015100").to_vec())
            .with_le(0x00);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), hex!("00A4040006A0000001510000"));
    }

    #[test]
    fn test_extended_serialization() {
        let cmd = Command::new_with_data(0x80, 0xA0, 0x00, 0x00, vec![0xAB; 300]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(&bytes[..7], &hex!("80A0000000012C"));
        assert_eq!(bytes.len(), 7 + 300);
    }

    #[test]
    fn test_chained() {
        let cmd = Command::new(0x80, 0xA0, 0x00, 0x00).chained();
        assert_eq!(cmd.cla, 0x90);
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&hex!("00A40400")).unwrap();
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("00A4040003010203")).unwrap();
        assert_eq!(cmd.data.as_deref(), Some(&hex!("010203")[..]));
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("00A4040003010203FF")).unwrap();
        assert_eq!(cmd.le, Some(0xFF));

        let cmd = Command::from_bytes(&hex!("00B00000FF")).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0xFF));

        assert!(Command::from_bytes(&hex!("00A4")).is_err());
        assert!(Command::from_bytes(&hex!("00A404000501")).is_err());
    }
}
