//! VP8 boolean arithmetic encoder, the exact inverse of
//! [`BoolReader`](crate::decoder::arithmetic::BoolReader).
//!
//! `low` holds the not yet emitted bits of the interval's lower bound.
//! `count` starts at -24 and reaches zero once a whole byte has been shifted
//! above those 24 bits; a carry out of bit 31 ripples into the bytes already
//! written.

use alloc::vec::Vec;

/// Branch decisions from a tree node down to a leaf, root first.
struct TreePath {
    steps: [(bool, u8); 16],
    len: usize,
}

impl TreePath {
    /// Depth-first search from the pair at `node` for the leaf holding `value`.
    fn search(&mut self, tree: &[i8], node: usize, value: i8) -> bool {
        for (branch, &entry) in tree[node..node + 2].iter().enumerate() {
            self.steps[self.len] = (branch == 1, (node / 2) as u8);
            self.len += 1;

            let found = if entry > 0 {
                self.search(tree, entry as usize, value)
            } else {
                -entry == value
            };
            if found {
                return true;
            }
            self.len -= 1;
        }
        false
    }
}

pub(crate) struct ArithmeticEncoder {
    buf: Vec<u8>,
    low: u32,
    /// In [128, 255] between calls.
    range: u32,
    count: i32,
}

impl Default for ArithmeticEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArithmeticEncoder {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            low: 0,
            range: 255,
            count: -24,
        }
    }

    /// Adds one to the bytes written so far.
    fn propagate_carry(&mut self) {
        for byte in self.buf.iter_mut().rev() {
            let (sum, overflow) = byte.overflowing_add(1);
            *byte = sum;
            if !overflow {
                return;
            }
        }
    }

    /// Writes `bit`, whose probability of being `false` is `prob / 256`.
    pub(crate) fn write_bool(&mut self, bit: bool, prob: u8) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit {
            self.low = self.low.wrapping_add(split);
            self.range -= split;
        } else {
            self.range = split;
        }

        let mut shift = self.range.leading_zeros() as i32 - 24;
        self.range <<= shift;
        self.count += shift;

        if self.count >= 0 {
            let offset = shift - self.count;
            if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                self.propagate_carry();
            }
            self.buf.push((self.low >> (24 - offset)) as u8);
            self.low = (self.low << offset) & 0xff_ffff;
            shift = self.count;
            self.count -= 8;
        }

        self.low <<= shift;
    }

    pub(crate) fn write_flag(&mut self, flag: bool) {
        self.write_bool(flag, 128);
    }

    /// Writes the low `num_bits` of `value`, most significant first.
    pub(crate) fn write_literal(&mut self, num_bits: u8, value: u8) {
        for bit in (0..num_bits).rev() {
            self.write_flag((value >> bit) & 1 != 0);
        }
    }

    /// Presence flag, magnitude, then a sign flag set for negative values.
    pub(crate) fn write_optional_signed_value(&mut self, num_bits: u8, value: Option<i8>) {
        self.write_flag(value.is_some());
        if let Some(value) = value {
            self.write_literal(num_bits, value.unsigned_abs());
            self.write_flag(value < 0);
        }
    }

    pub(crate) fn write_with_tree(&mut self, tree: &[i8], probs: &[u8], value: i8) {
        self.write_with_tree_start_index(tree, probs, value, 0);
    }

    /// Writes the branch decisions that lead from the pair at `start_index`
    /// to the leaf holding `value`. Leaves are stored negated.
    pub(crate) fn write_with_tree_start_index(
        &mut self,
        tree: &[i8],
        probs: &[u8],
        value: i8,
        start_index: usize,
    ) {
        debug_assert_eq!(tree.len(), probs.len() * 2);

        let mut path = TreePath {
            steps: [(false, 0); 16],
            len: 0,
        };
        if !path.search(tree, start_index, value) {
            debug_assert!(false, "{value} is not reachable from {start_index} in {tree:?}");
            return;
        }

        for &(bit, pair) in &path.steps[..path.len] {
            self.write_bool(bit, probs[usize::from(pair)]);
        }
    }

    /// Pads with 32 zero bits so every coded bit is emitted and the decoder
    /// never reads past the end, then returns the bytes.
    pub(crate) fn flush_and_get_buffer(mut self) -> Vec<u8> {
        for _ in 0..32 {
            self.write_flag(false);
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use crate::common::types::*;

    use super::*;

    #[test]
    fn short_sequence() {
        let mut encoder = ArithmeticEncoder::new();
        encoder.write_flag(false);
        encoder.write_bool(true, 10);
        encoder.write_bool(false, 250);
        encoder.write_literal(1, 1);
        encoder.write_literal(3, 5);
        encoder.write_literal(8, 64);
        encoder.write_literal(8, 185);
        assert_eq!(encoder.flush_and_get_buffer(), [104, 101, 107, 128]);
    }

    #[test]
    fn tree_leaf_path() {
        let mut encoder = ArithmeticEncoder::new();
        encoder.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, TM_PRED);
        assert_eq!(encoder.flush_and_get_buffer(), [233, 64]);
    }

    #[test]
    fn tree_path_from_inner_node() {
        // DCT_0 sits below the EOB branch; starting after it skips that decision
        let mut from_root = TreePath {
            steps: [(false, 0); 16],
            len: 0,
        };
        assert!(from_root.search(&DCT_TOKEN_TREE, 0, DCT_0));
        assert_eq!(&from_root.steps[..from_root.len], &[(true, 0), (false, 1)]);

        let mut from_inner = TreePath {
            steps: [(false, 0); 16],
            len: 0,
        };
        assert!(from_inner.search(&DCT_TOKEN_TREE, 2, DCT_0));
        assert_eq!(&from_inner.steps[..from_inner.len], &[(false, 1)]);
    }

    #[test]
    fn carry_walks_back_over_ff_bytes() {
        let mut encoder = ArithmeticEncoder::new();
        encoder.buf = vec![0x12, 0xFF, 0xFF];
        encoder.propagate_carry();
        assert_eq!(encoder.buf, [0x13, 0x00, 0x00]);
    }
}
