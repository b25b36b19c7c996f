//! Length-Header Framing
//!
//! A frame on the wire is `[length header][payload]`. The header only carries
//! the payload length; how that length is spelled differs between networks, so
//! the reader and writer work against the [`LengthHeader`] trait and never
//! against a concrete layout.
//!
//! Stock layouts:
//!
//! | Header | Bytes | Layout | Max payload |
//! |---|---|---|---|
//! | [`VmlHeader`] | 4 | u16 BE length + u16 reserved (zero) | 65535 |
//! | [`Binary2Header`] | 2 | u16 BE length | 65535 |
//! | [`Binary4Header`] | 4 | u32 BE length | u32::MAX |
//! | [`Ascii4Header`] | 4 | zero-padded decimal digits | 9999 |

use crate::CodecError;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

/// Converts a payload length to its wire prefix and back
pub trait LengthHeader: Send + Sync + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Exact number of bytes the header occupies on the wire
    fn header_len(&self) -> usize;

    /// Largest payload length the header can express
    fn max_length(&self) -> usize;

    /// Append the header for a payload of `length` bytes
    fn encode(&self, length: usize, dst: &mut BytesMut) -> Result<(), CodecError>;

    /// Decode the payload length from exactly `header_len()` bytes
    fn decode(&self, src: &[u8]) -> Result<usize, CodecError>;

    /// Reject lengths the header cannot carry
    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        if length > self.max_length() {
            return Err(CodecError::LengthOutOfRange {
                length,
                max: self.max_length(),
                header: self.name(),
            });
        }
        Ok(())
    }
}

fn check_src(header: &dyn LengthHeader, src: &[u8]) -> Result<(), CodecError> {
    if src.len() != header.header_len() {
        return Err(CodecError::message_too_small(
            header.header_len(),
            src.len(),
            format!("{} length header", header.name()),
        ));
    }
    Ok(())
}

/// Visa-style 4-byte header: big-endian length followed by two reserved zero bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct VmlHeader;

impl LengthHeader for VmlHeader {
    fn name(&self) -> &'static str {
        "vml"
    }

    fn header_len(&self) -> usize {
        4
    }

    fn max_length(&self) -> usize {
        u16::MAX as usize
    }

    fn encode(&self, length: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_length(length)?;
        let mut buf = [0u8; 4];
        BigEndian::write_u16(&mut buf[..2], length as u16);
        dst.put_slice(&buf);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<usize, CodecError> {
        check_src(self, src)?;
        let reserved = BigEndian::read_u16(&src[2..4]);
        if reserved != 0 {
            return Err(CodecError::invalid_header(src, "reserved bytes not zero"));
        }
        Ok(BigEndian::read_u16(&src[..2]) as usize)
    }
}

/// Plain 2-byte big-endian length
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary2Header;

impl LengthHeader for Binary2Header {
    fn name(&self) -> &'static str {
        "binary2"
    }

    fn header_len(&self) -> usize {
        2
    }

    fn max_length(&self) -> usize {
        u16::MAX as usize
    }

    fn encode(&self, length: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_length(length)?;
        dst.put_u16(length as u16);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<usize, CodecError> {
        check_src(self, src)?;
        Ok(BigEndian::read_u16(src) as usize)
    }
}

/// Plain 4-byte big-endian length
#[derive(Debug, Clone, Copy, Default)]
pub struct Binary4Header;

impl LengthHeader for Binary4Header {
    fn name(&self) -> &'static str {
        "binary4"
    }

    fn header_len(&self) -> usize {
        4
    }

    fn max_length(&self) -> usize {
        u32::MAX as usize
    }

    fn encode(&self, length: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_length(length)?;
        dst.put_u32(length as u32);
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<usize, CodecError> {
        check_src(self, src)?;
        Ok(BigEndian::read_u32(src) as usize)
    }
}

/// Four ASCII decimal digits, zero padded
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascii4Header;

impl LengthHeader for Ascii4Header {
    fn name(&self) -> &'static str {
        "ascii4"
    }

    fn header_len(&self) -> usize {
        4
    }

    fn max_length(&self) -> usize {
        9999
    }

    fn encode(&self, length: usize, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_length(length)?;
        dst.put_slice(format!("{:04}", length).as_bytes());
        Ok(())
    }

    fn decode(&self, src: &[u8]) -> Result<usize, CodecError> {
        check_src(self, src)?;
        if !src.iter().all(u8::is_ascii_digit) {
            return Err(CodecError::invalid_header(src, "expected 4 ascii digits"));
        }
        Ok(src
            .iter()
            .fold(0usize, |acc, digit| acc * 10 + (digit - b'0') as usize))
    }
}
