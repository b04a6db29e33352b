//! Little-endian writes into a `Vec<u8>` without requiring `std::io::Write`.

use alloc::vec::Vec;
use byteorder_lite::{ByteOrder, LittleEndian};

/// Extension trait for writing the frame tag, partition table and RIFF
/// headers.
pub(crate) trait VecWriter {
    /// Append a slice to the buffer.
    fn write_all(&mut self, data: &[u8]);

    /// Write a u16 in little-endian.
    fn write_u16_le(&mut self, v: u16);

    /// Write the low 3 bytes of `v` in little-endian.
    fn write_u24_le(&mut self, v: u32);

    /// Write a u32 in little-endian.
    fn write_u32_le(&mut self, v: u32);
}

impl VecWriter for Vec<u8> {
    #[inline]
    fn write_all(&mut self, data: &[u8]) {
        self.extend_from_slice(data);
    }

    #[inline]
    fn write_u16_le(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    #[inline]
    fn write_u24_le(&mut self, v: u32) {
        debug_assert!(v < 1 << 24);
        let mut buf = [0u8; 3];
        LittleEndian::write_u24(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    #[inline]
    fn write_u32_le(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.extend_from_slice(&buf);
    }
}
