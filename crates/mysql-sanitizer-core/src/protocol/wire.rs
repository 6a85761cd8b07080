//! Length-encoded integer and string codec over packet payloads.
//!
//! MySQL's variable-width integer encoding: a first byte below 0xFB is the
//! value itself; 0xFB marks NULL (string contexts only); 0xFC, 0xFD and
//! 0xFE prefix 2-, 3- and 8-byte little-endian values.

use crate::error::{ProxyError, Result};
use crate::protocol::constants::{LENENC_NULL, LENENC_U16, LENENC_U24, LENENC_U64};

/// Cursor over a single packet payload.
///
/// Every read fails with a malformed-packet error when the payload is
/// shorter than the field layout declares; the cursor never panics on
/// truncated input.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProxyError::MalformedPacket {
                message: format!(
                    "payload truncated: need {n} bytes, {} remain",
                    self.remaining()
                ),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        let mut raw = [0u8; 2];
        raw.copy_from_slice(bytes);
        Ok(u16::from_le_bytes(raw))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Decode a length-encoded integer.
    ///
    /// The NULL marker is rejected here: it only has meaning in string
    /// contexts, which go through [`read_string_or_null`].
    ///
    /// [`read_string_or_null`]: PayloadReader::read_string_or_null
    pub fn read_lenenc_int(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(u64::from(first)),
            LENENC_U16 => {
                let bytes = self.take(2)?;
                Ok(u64::from(bytes[0]) | u64::from(bytes[1]) << 8)
            }
            LENENC_U24 => {
                let bytes = self.take(3)?;
                Ok(u64::from(bytes[0]) | u64::from(bytes[1]) << 8 | u64::from(bytes[2]) << 16)
            }
            LENENC_U64 => {
                let bytes = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(u64::from_le_bytes(raw))
            }
            _ => Err(ProxyError::MalformedPacket {
                message: format!("invalid length-encoded integer marker 0x{first:02x}"),
            }),
        }
    }

    /// Decode one length-encoded field: `None` for the NULL marker,
    /// otherwise the declared number of following bytes.
    pub fn read_string_or_null(&mut self) -> Result<Option<&'a [u8]>> {
        if self.buf.get(self.pos) == Some(&LENENC_NULL) {
            self.pos += 1;
            return Ok(None);
        }
        let len = self.read_lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| ProxyError::MalformedPacket {
            message: format!("field length {len} exceeds addressable size"),
        })?;
        Ok(Some(self.take(len)?))
    }
}

/// Append a length-encoded integer in its minimal-width form.
pub fn write_lenenc_int(buf: &mut Vec<u8>, value: u64) {
    if value < 251 {
        buf.push(value as u8);
    } else if value < 0x1_0000 {
        buf.push(LENENC_U16);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 0x100_0000 {
        buf.push(LENENC_U24);
        buf.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        buf.push(LENENC_U64);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Append one length-encoded field, encoding `None` as the explicit NULL
/// marker.
pub fn write_string_or_null(buf: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            write_lenenc_int(buf, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        None => buf.push(LENENC_NULL),
    }
}

/// Bounded hex dump of payload bytes for fatal-path diagnostics.
#[must_use]
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        hex::encode(bytes)
    } else {
        format!("{}.. ({} bytes)", hex::encode(&bytes[..max]), bytes.len())
    }
}
