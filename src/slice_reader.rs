//! A no_std compatible slice reader for the RIFF container.
//!
//! [`SliceReader`] wraps a byte slice and reads little-endian primitives
//! with position tracking, similar to `std::io::Cursor` but without
//! requiring the standard library. Running off the end of the slice is
//! reported as [`DecodeError::StreamTruncated`].

use byteorder_lite::{ByteOrder, LittleEndian};
use core::fmt;

use crate::DecodeError;

/// A reader that wraps a byte slice and tracks the current position.
#[derive(Clone)]
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// Create a new SliceReader wrapping the given byte slice.
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the current position in the slice.
    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of bytes remaining from the current position.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Skip `n` bytes.
    #[inline]
    pub(crate) fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take_slice(n).map(|_| ())
    }

    /// Read exactly `buf.len()` bytes into the buffer.
    #[inline]
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        let src = self.take_slice(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Read a single byte.
    #[inline]
    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_slice(1)?[0])
    }

    /// Read a u16 in little-endian byte order.
    #[inline]
    pub(crate) fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        Ok(LittleEndian::read_u16(self.take_slice(2)?))
    }

    /// Read a u24 in little-endian byte order (as u32).
    #[inline]
    pub(crate) fn read_u24_le(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u24(self.take_slice(3)?))
    }

    /// Read a u32 in little-endian byte order.
    #[inline]
    pub(crate) fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.take_slice(4)?))
    }

    /// Take a slice of n bytes from the current position and advance position.
    /// Returns a slice reference without copying data.
    #[inline]
    pub(crate) fn take_slice(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::StreamTruncated)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

impl fmt::Debug for SliceReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceReader")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a];
        let mut r = SliceReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16_le().unwrap(), 0x0302);
        assert_eq!(r.read_u24_le().unwrap(), 0x060504);
        assert_eq!(r.read_u32_le().unwrap(), 0x0a090807);
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.position(), 10);
    }

    #[test]
    fn overrun_is_truncation() {
        let data = [0u8; 3];
        let mut r = SliceReader::new(&data);
        assert!(matches!(r.read_u32_le(), Err(DecodeError::StreamTruncated)));
        // a failed read does not move the position
        assert_eq!(r.position(), 0);
        assert!(r.skip(3).is_ok());
        assert!(matches!(r.take_slice(1), Err(DecodeError::StreamTruncated)));
        assert!(matches!(r.skip(usize::MAX), Err(DecodeError::StreamTruncated)));
    }
}
