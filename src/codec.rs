//! Length-prefixed message framing.
//!
//! Every frame on the wire is a length header followed by the frame body:
//!
//! ```text
//! +--------+--------+--------+---- ... ----+
//! | length (1, 2 or 4 bytes) |    body     |
//! +--------+--------+--------+---- ... ----+
//! ```
//!
//! The length counts body bytes only. Frames whose length falls outside
//! `[min_msg_len, max_msg_len]` are rejected on both read and write.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Default width of the length header.
pub const DEFAULT_LENGTH_FIELD: LengthField = LengthField::U16;

/// Default minimum body length.
pub const DEFAULT_MIN_MSG_LEN: usize = 1;

/// Default maximum body length.
pub const DEFAULT_MAX_MSG_LEN: usize = 4096;

/// Width of the length header preceding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// One byte, bodies up to 255 bytes.
    U8,
    /// Two bytes, bodies up to 65535 bytes.
    U16,
    /// Four bytes, bodies up to 4 GiB.
    U32,
}

impl LengthField {
    /// Number of bytes the header occupies.
    pub fn size(&self) -> usize {
        match self {
            LengthField::U8 => 1,
            LengthField::U16 => 2,
            LengthField::U32 => 4,
        }
    }

    /// Largest body length the header can express.
    pub fn max_len(&self) -> usize {
        match self {
            LengthField::U8 => u8::MAX as usize,
            LengthField::U16 => u16::MAX as usize,
            LengthField::U32 => u32::MAX as usize,
        }
    }
}

/// Frame parser configuration and codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgParser {
    /// Width of the length header.
    pub length_field: LengthField,
    /// Minimum accepted body length.
    pub min_msg_len: usize,
    /// Maximum accepted body length, clamped to what `length_field` holds.
    pub max_msg_len: usize,
    /// Encode integers little-endian instead of big-endian.
    pub little_endian: bool,
}

impl Default for MsgParser {
    fn default() -> Self {
        Self {
            length_field: DEFAULT_LENGTH_FIELD,
            min_msg_len: DEFAULT_MIN_MSG_LEN,
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            little_endian: false,
        }
    }
}

impl MsgParser {
    /// Set the length header width.
    pub fn with_length_field(mut self, field: LengthField) -> Self {
        self.length_field = field;
        self
    }

    /// Set the accepted body length range.
    pub fn with_msg_len(mut self, min: usize, max: usize) -> Self {
        self.min_msg_len = min;
        self.max_msg_len = max;
        self
    }

    /// Select little-endian integer encoding.
    pub fn with_little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    /// Effective maximum body length.
    pub fn max_len(&self) -> usize {
        self.max_msg_len.min(self.length_field.max_len())
    }

    /// Check that the length range is usable.
    pub fn validate(&self) -> Result<()> {
        if self.min_msg_len > self.max_len() {
            return Err(Error::config(format!(
                "min_msg_len {} exceeds max_msg_len {}",
                self.min_msg_len,
                self.max_len()
            )));
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_len() {
            return Err(Error::MessageTooLong {
                len,
                max: self.max_len(),
            });
        }
        if len < self.min_msg_len {
            return Err(Error::MessageTooShort {
                len,
                min: self.min_msg_len,
            });
        }
        Ok(())
    }

    /// Decode a length header of exactly `length_field.size()` bytes.
    pub(crate) fn decode_len(&self, header: &[u8]) -> usize {
        match (self.length_field, self.little_endian) {
            (LengthField::U8, _) => header[0] as usize,
            (LengthField::U16, false) => u16::from_be_bytes([header[0], header[1]]) as usize,
            (LengthField::U16, true) => u16::from_le_bytes([header[0], header[1]]) as usize,
            (LengthField::U32, false) => {
                u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
            }
            (LengthField::U32, true) => {
                u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize
            }
        }
    }

    /// Validate a decoded length before the body is read.
    pub(crate) fn check_incoming(&self, len: usize) -> Result<()> {
        self.check_len(len)
    }

    /// Read one frame body from a blocking reader.
    pub fn read_frame<R: Read>(&self, reader: &mut R) -> Result<Bytes> {
        let mut header = [0u8; 4];
        let header = &mut header[..self.length_field.size()];
        reader.read_exact(header)?;

        let len = self.decode_len(header);
        self.check_len(len)?;

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        Ok(Bytes::from(body))
    }

    /// Encode the concatenation of `parts` as one complete frame.
    pub fn encode_frame(&self, parts: &[&[u8]]) -> Result<Bytes> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        self.check_len(len)?;

        let mut buf = BytesMut::with_capacity(self.length_field.size() + len);
        match (self.length_field, self.little_endian) {
            (LengthField::U8, _) => buf.put_u8(len as u8),
            (LengthField::U16, false) => buf.put_u16(len as u16),
            (LengthField::U16, true) => buf.put_u16_le(len as u16),
            (LengthField::U32, false) => buf.put_u32(len as u32),
            (LengthField::U32, true) => buf.put_u32_le(len as u32),
        }
        for part in parts {
            buf.put_slice(part);
        }
        Ok(buf.freeze())
    }

    /// Write the concatenation of `parts` as one frame to a blocking writer.
    pub fn write_frame<W: Write>(&self, writer: &mut W, parts: &[&[u8]]) -> Result<()> {
        let frame = self.encode_frame(parts)?;
        writer.write_all(&frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_write_frame() {
        let parser = MsgParser::default();

        let mut buffer = Vec::new();
        parser
            .write_frame(&mut buffer, &[b"\x00\x07".as_slice(), b"hello".as_slice()])
            .unwrap();
        assert_eq!(&buffer[..2], &[0x00, 0x07]);

        let mut cursor = Cursor::new(buffer);
        let body = parser.read_frame(&mut cursor).unwrap();
        assert_eq!(body.as_ref(), b"\x00\x07hello");
    }

    #[test]
    fn test_little_endian_header() {
        let parser = MsgParser::default()
            .with_length_field(LengthField::U32)
            .with_little_endian(true);

        let frame = parser.encode_frame(&[b"abc".as_slice()]).unwrap();
        assert_eq!(frame.as_ref(), &[3, 0, 0, 0, b'a', b'b', b'c']);

        let body = parser.read_frame(&mut Cursor::new(frame.to_vec())).unwrap();
        assert_eq!(body.as_ref(), b"abc");
    }

    #[test]
    fn test_reject_out_of_range() {
        let parser = MsgParser::default().with_msg_len(2, 8);

        assert!(matches!(
            parser.encode_frame(&[b"x".as_slice()]),
            Err(Error::MessageTooShort { len: 1, min: 2 })
        ));
        assert!(matches!(
            parser.encode_frame(&[b"123456789".as_slice()]),
            Err(Error::MessageTooLong { len: 9, max: 8 })
        ));

        // Header claims 200 bytes
        let mut cursor = Cursor::new(vec![0x00, 200]);
        assert!(matches!(
            parser.read_frame(&mut cursor),
            Err(Error::MessageTooLong { len: 200, .. })
        ));
    }

    #[test]
    fn test_max_len_clamped_to_header() {
        let parser = MsgParser::default()
            .with_length_field(LengthField::U8)
            .with_msg_len(1, 100_000);
        assert_eq!(parser.max_len(), 255);
        assert!(parser.validate().is_ok());

        let bad = MsgParser::default()
            .with_length_field(LengthField::U8)
            .with_msg_len(300, 400);
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_truncated_body() {
        let parser = MsgParser::default();
        let mut cursor = Cursor::new(vec![0x00, 0x05, b'a', b'b']);
        let err = parser.read_frame(&mut cursor).unwrap_err();
        assert!(err.is_disconnect());
    }
}
