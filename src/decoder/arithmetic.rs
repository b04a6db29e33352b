//! VP8 boolean arithmetic decoder.
//!
//! Keeps `range - 1` in [127, 254] and a 64-bit value window that is refilled
//! 56 bits at a time while at least eight bytes remain, then byte by byte.
//! Normalization is a single leading-zeros shift.

use crate::common::types::TreeNode;

use super::api::DecodeError;

/// Number of bits loaded per bulk refill.
const BITS: i32 = 56;
/// Bytes consumed per bulk refill (`BITS / 8`).
const BYTES_PER_LOAD: usize = 7;

/// Boolean decoder over one partition of a VP8 frame.
pub(crate) struct BoolReader<'a> {
    /// Current accumulated value
    value: u64,
    /// Current range minus 1. In [127, 254] interval.
    range: u32,
    /// Number of valid bits left
    bits: i32,
    /// Remaining buffer to read from
    buf: &'a [u8],
    /// One implicit zero byte was shifted in past the end
    eof: bool,
    /// More than one byte was needed past the end
    exhausted: bool,
}

impl<'a> BoolReader<'a> {
    /// Creates a reader positioned at the first bit of `data`.
    pub(crate) fn new(data: &'a [u8]) -> Self {
        let mut br = Self {
            value: 0,
            range: 255 - 1,
            bits: -8,
            buf: data,
            eof: false,
            exhausted: false,
        };
        br.load_new_bytes();
        br
    }

    #[cold]
    fn load_final_bytes(&mut self) {
        if let Some((&byte, rest)) = self.buf.split_first() {
            self.bits += 8;
            self.value = u64::from(byte) | (self.value << 8);
            self.buf = rest;
        } else if !self.eof {
            self.value <<= 8;
            self.bits += 8;
            self.eof = true;
        } else {
            // avoids shifting by a negative amount; every bit from here on is garbage
            self.bits = 0;
            self.exhausted = true;
        }
    }

    #[inline(always)]
    fn load_new_bytes(&mut self) {
        if let Some(chunk) = self.buf.get(..8) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            // first seven bytes, big endian
            let bits = u64::from_be_bytes(word) >> 8;
            self.value = bits | (self.value << BITS);
            self.bits += BITS;
            self.buf = &self.buf[BYTES_PER_LOAD..];
        } else {
            self.load_final_bytes();
        }
    }

    /// Reads one bool whose probability of being `false` is `prob / 256`.
    #[inline(always)]
    pub(crate) fn read_bool(&mut self, prob: u8) -> bool {
        let mut range = self.range;
        if self.bits < 0 {
            self.load_new_bytes();
        }

        let pos = self.bits;
        let split = (range * u32::from(prob)) >> 8;
        let value = (self.value >> pos) as u32;
        let bit = value > split;

        if bit {
            range -= split;
            self.value = self.value.wrapping_sub((u64::from(split) + 1) << pos);
        } else {
            range = split + 1;
        }

        let shift = 7 ^ (31 ^ range.leading_zeros() as i32);
        range <<= shift;
        self.bits -= shift;
        self.range = range - 1;

        bit
    }

    /// Integer flavour of [`read_bool`](Self::read_bool) for arithmetic on the result.
    #[inline(always)]
    pub(crate) fn read_bit(&mut self, prob: u8) -> i32 {
        i32::from(self.read_bool(prob))
    }

    /// Reads a bool at probability 128.
    #[inline(always)]
    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Reads an `n`-bit unsigned literal, most significant bit first.
    pub(crate) fn read_literal(&mut self, n: u8) -> u8 {
        let mut v = 0u8;
        for _ in 0..n {
            v = (v << 1) | u8::from(self.read_flag());
        }
        v
    }

    /// Reads a presence flag, then magnitude and sign. Absent values are 0.
    pub(crate) fn read_optional_signed_value(&mut self, n: u8) -> i32 {
        if !self.read_flag() {
            return 0;
        }
        let magnitude = i32::from(self.read_literal(n));
        if self.read_flag() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Walks a precomputed tree from its root and returns the leaf symbol.
    pub(crate) fn read_with_tree<const N: usize>(&mut self, tree: &[TreeNode; N]) -> i8 {
        self.read_with_tree_from(tree, tree[0])
    }

    /// Walks a precomputed tree starting at `node`.
    pub(crate) fn read_with_tree_from(&mut self, tree: &[TreeNode], mut node: TreeNode) -> i8 {
        loop {
            let b = self.read_bool(node.prob);
            let i = if b { node.right } else { node.left };
            let Some(next_node) = tree.get(usize::from(i)) else {
                return TreeNode::value_from_branch(i);
            };
            node = *next_node;
        }
    }

    /// True once the reader needed a second byte past the end of its data.
    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Passes `value` through unless the data ran out.
    #[inline]
    pub(crate) fn check<T>(&self, value: T) -> Result<T, DecodeError> {
        if self.exhausted {
            Err(DecodeError::BitstreamCorruption)
        } else {
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use crate::common::types::{KEYFRAME_UV_MODE_NODES, KEYFRAME_YMODE_NODES, TM_PRED};
    use crate::encoder::arithmetic::ArithmeticEncoder;

    #[test]
    fn test_basic_reading() {
        let data = b"hello world and some more text";
        let mut br = BoolReader::new(data);

        for _ in 0..50 {
            let _ = br.read_flag();
        }
        assert!(!br.is_exhausted());
        assert!(br.check(()).is_ok());
    }

    #[test]
    fn test_short_data() {
        let data = [0x55, 0xAA, 0x55];
        let mut br = BoolReader::new(&data);

        for _ in 0..100 {
            let _ = br.read_flag();
        }
        assert!(br.is_exhausted());
        assert!(matches!(br.check(()), Err(DecodeError::BitstreamCorruption)));
    }

    #[test]
    fn one_byte_over_read_is_tolerated() {
        let data = [0x12, 0x34];
        let mut br = BoolReader::new(&data);
        // a flag shifts out at most one bit: the second data byte and the
        // implicit zero byte cover sixteen of them
        for _ in 0..15 {
            let _ = br.read_flag();
        }
        assert!(!br.is_exhausted());

        for _ in 0..16 {
            let _ = br.read_flag();
        }
        assert!(br.is_exhausted());
    }

    #[test]
    fn test_encoder_with_decoder() {
        let mut encoder = ArithmeticEncoder::new();
        encoder.write_bool(true, 40);
        encoder.write_bool(true, 110);
        encoder.write_bool(false, 70);
        encoder.write_bool(false, 10);
        encoder.write_bool(true, 5);
        encoder.write_literal(7, 93);
        encoder.write_optional_signed_value(4, Some(-6));
        encoder.write_optional_signed_value(4, None);
        let write_buffer = encoder.flush_and_get_buffer();

        let mut decoder = BoolReader::new(&write_buffer);
        assert!(decoder.read_bool(40));
        assert!(decoder.read_bool(110));
        assert!(!decoder.read_bool(70));
        assert!(!decoder.read_bool(10));
        assert!(decoder.read_bool(5));
        assert_eq!(decoder.read_literal(7), 93);
        assert_eq!(decoder.read_optional_signed_value(4), -6);
        assert_eq!(decoder.read_optional_signed_value(4), 0);
        decoder.check(()).unwrap();
    }

    #[test]
    fn test_tree_round_trip() {
        let mut encoder = ArithmeticEncoder::new();
        for value in [TM_PRED, 0, 4, 1, 2] {
            encoder.write_with_tree(
                &crate::common::types::KEYFRAME_YMODE_TREE,
                &crate::common::types::KEYFRAME_YMODE_PROBS,
                value,
            );
        }
        encoder.write_with_tree(
            &crate::common::types::KEYFRAME_UV_MODE_TREE,
            &crate::common::types::KEYFRAME_UV_MODE_PROBS,
            2,
        );
        let buffer = encoder.flush_and_get_buffer();

        let mut decoder = BoolReader::new(&buffer);
        for value in [TM_PRED, 0, 4, 1, 2] {
            assert_eq!(decoder.read_with_tree(&KEYFRAME_YMODE_NODES), value);
        }
        assert_eq!(decoder.read_with_tree(&KEYFRAME_UV_MODE_NODES), 2);
        decoder.check(()).unwrap();
    }

    fn round_trip(bools: &[(bool, u8)]) {
        let mut encoder = ArithmeticEncoder::new();
        for &(value, prob) in bools {
            encoder.write_bool(value, prob);
        }
        let buffer = encoder.flush_and_get_buffer();

        let mut decoder = BoolReader::new(&buffer);
        for (i, &(value, prob)) in bools.iter().enumerate() {
            assert_eq!(decoder.read_bool(prob), value, "bool {i} with prob {prob}");
        }
        decoder.check(()).unwrap();
    }

    #[test]
    fn random_bool_sequences_round_trip() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5650_3820);
        for _ in 0..8 {
            let bools: Vec<(bool, u8)> = (0..2000)
                .map(|_| (rng.gen(), rng.gen_range(1..=255)))
                .collect();
            round_trip(&bools);
        }
    }

    #[test]
    fn uniform_and_alternating_sequences_round_trip() {
        for prob in [1, 2, 128, 254, 255] {
            round_trip(&[(true, prob); 1500]);
            round_trip(&[(false, prob); 1500]);
            let alternating: Vec<(bool, u8)> = (0..1500).map(|i| (i % 2 == 0, prob)).collect();
            round_trip(&alternating);
        }
    }
}
