//! Prediction, forward transform, quantization and reconstruction of one
//! macroblock.
//!
//! Coefficient levels are kept in raster order; the token writer applies the
//! zigzag scan. Reconstruction dequantizes exactly the way the decoder does,
//! so the work buffers end up holding the decoder's pixels.

use core::array;

use crate::common::prediction::*;
use crate::common::transform;
use crate::common::types::{ChromaMode, LumaMode, Segment};

/// Largest level the token alphabet can carry.
const MAX_LEVEL: i32 = 2047;

/// Quantized luma levels: the Y2 block and the 16 luma blocks with their DC
/// position left at zero.
#[derive(Clone, Copy)]
pub(super) struct LumaCoeffs {
    pub(super) y2: [i32; 16],
    pub(super) blocks: [[i32; 16]; 16],
}

impl LumaCoeffs {
    pub(super) fn is_zero(&self) -> bool {
        self.y2.iter().all(|&l| l == 0) && self.blocks.iter().flatten().all(|&l| l == 0)
    }

    pub(super) fn nonzero_count(&self) -> u32 {
        let count = |b: &[i32; 16]| b.iter().filter(|&&l| l != 0).count() as u32;
        count(&self.y2) + self.blocks.iter().map(count).sum::<u32>()
    }
}

/// Quantized levels of the four U and four V blocks.
#[derive(Clone, Copy)]
pub(super) struct ChromaCoeffs {
    pub(super) u: [[i32; 16]; 4],
    pub(super) v: [[i32; 16]; 4],
}

impl ChromaCoeffs {
    pub(super) fn is_zero(&self) -> bool {
        self.u.iter().chain(&self.v).flatten().all(|&l| l == 0)
    }

    pub(super) fn nonzero_count(&self) -> u32 {
        self.u.iter().chain(&self.v).flatten().filter(|&&l| l != 0).count() as u32
    }
}

/// Rounds to the nearest level, keeping the sign.
#[inline]
fn quantize(coeff: i32, q: i16) -> i32 {
    let q = i32::from(q);
    let level = ((coeff.abs() + q / 2) / q).min(MAX_LEVEL);
    if coeff < 0 {
        -level
    } else {
        level
    }
}

/// Source minus prediction for the 4x4 block at `(x, y)` of the source plane
/// and `(x0, y0)` of the work buffer.
#[allow(clippy::too_many_arguments)]
fn residual_block(
    src: &[u8],
    src_stride: usize,
    x: usize,
    y: usize,
    ws: &[u8],
    stride: usize,
    x0: usize,
    y0: usize,
) -> [i32; 16] {
    array::from_fn(|i| {
        let (row, col) = (i / 4, i % 4);
        i32::from(src[(y + row) * src_stride + x + col]) - i32::from(ws[(y0 + row) * stride + x0 + col])
    })
}

/// Squared error between a `size x size` source area and the block of `ws`.
pub(super) fn sse_block(
    src: &[u8],
    src_stride: usize,
    x: usize,
    y: usize,
    ws: &[u8],
    stride: usize,
    size: usize,
) -> u64 {
    let mut sse = 0u64;
    for row in 0..size {
        let src_row = &src[(y + row) * src_stride + x..][..size];
        let ws_row = &ws[(row + 1) * stride + 1..][..size];
        for (&s, &p) in src_row.iter().zip(ws_row) {
            let diff = i32::from(s) - i32::from(p);
            sse += (diff * diff) as u64;
        }
    }
    sse
}

impl super::Vp8Encoder<'_> {
    pub(super) fn predicted_luma(&self, mbx: usize, mby: usize, mode: LumaMode) -> [u8; LUMA_BLOCK_SIZE] {
        let mut ws = create_border_luma(
            mbx,
            mby,
            self.mbwidth,
            &self.top_border_y,
            &self.left_border_y,
        );
        predict_luma(&mut ws, mode, mbx, mby);
        ws
    }

    pub(super) fn predicted_chroma(
        &self,
        mbx: usize,
        mby: usize,
        mode: ChromaMode,
    ) -> ([u8; CHROMA_BLOCK_SIZE], [u8; CHROMA_BLOCK_SIZE]) {
        let mut uws = create_border_chroma(mbx, mby, &self.top_border_u, &self.left_border_u);
        let mut vws = create_border_chroma(mbx, mby, &self.top_border_v, &self.left_border_v);
        predict_chroma(&mut uws, mode, mbx, mby);
        predict_chroma(&mut vws, mode, mbx, mby);
        (uws, vws)
    }
}

/// Transforms and quantizes the luma residual of a whole-block prediction.
///
/// The 16 DC coefficients go through the Walsh-Hadamard transform into the
/// Y2 block.
pub(super) fn quantize_luma(
    src: &[u8],
    src_stride: usize,
    mbx: usize,
    mby: usize,
    ws: &[u8],
    segment: &Segment,
) -> LumaCoeffs {
    let mut dcs = [0i32; 16];
    let mut blocks = [[0i32; 16]; 16];

    for (i, block) in blocks.iter_mut().enumerate() {
        let (bx, by) = ((i % 4) * 4, (i / 4) * 4);
        *block = residual_block(
            src,
            src_stride,
            mbx * 16 + bx,
            mby * 16 + by,
            ws,
            LUMA_STRIDE,
            1 + bx,
            1 + by,
        );
        transform::dct4x4(block);

        dcs[i] = block[0];
        block[0] = 0;
        for coeff in &mut block[1..] {
            *coeff = quantize(*coeff, segment.yac);
        }
    }

    transform::wht4x4(&mut dcs);
    let y2 = array::from_fn(|k| quantize(dcs[k], if k == 0 { segment.y2dc } else { segment.y2ac }));

    LumaCoeffs { y2, blocks }
}

/// Adds the dequantized luma residual onto the prediction in `ws`.
///
/// Returns whether any luma block has a nonzero DC after the inverse WHT or
/// a nonzero AC level, which is what the loop filter keys on.
pub(super) fn reconstruct_luma(ws: &mut [u8], coeffs: &LumaCoeffs, segment: &Segment) -> bool {
    let mut dcs: [i32; 16] = array::from_fn(|k| {
        let q = if k == 0 { segment.y2dc } else { segment.y2ac };
        coeffs.y2[k] * i32::from(q)
    });
    transform::iwht4x4(&mut dcs);

    let mut non_zero_dct = false;
    for (i, levels) in coeffs.blocks.iter().enumerate() {
        let mut block = [0i32; 16];
        block[0] = dcs[i];
        for (c, &level) in block[1..].iter_mut().zip(&levels[1..]) {
            *c = level * i32::from(segment.yac);
        }

        let has_ac = levels[1..].iter().any(|&l| l != 0);
        non_zero_dct |= block[0] != 0 || has_ac;

        if block.iter().any(|&c| c != 0) {
            transform::idct4x4(&mut block);
            add_residue(ws, &block, 1 + (i / 4) * 4, 1 + (i % 4) * 4, LUMA_STRIDE);
        }
    }

    non_zero_dct
}

/// Transforms and quantizes the four 4x4 blocks of one chroma plane.
pub(super) fn quantize_chroma(
    src: &[u8],
    src_stride: usize,
    mbx: usize,
    mby: usize,
    ws: &[u8],
    segment: &Segment,
) -> [[i32; 16]; 4] {
    array::from_fn(|i| {
        let (bx, by) = ((i % 2) * 4, (i / 2) * 4);
        let mut block = residual_block(
            src,
            src_stride,
            mbx * 8 + bx,
            mby * 8 + by,
            ws,
            CHROMA_STRIDE,
            1 + bx,
            1 + by,
        );
        transform::dct4x4(&mut block);
        array::from_fn(|k| quantize(block[k], if k == 0 { segment.uvdc } else { segment.uvac }))
    })
}

/// Adds the dequantized residual of one chroma plane onto `ws`. Returns
/// whether any level is nonzero.
pub(super) fn reconstruct_chroma(ws: &mut [u8], blocks: &[[i32; 16]; 4], segment: &Segment) -> bool {
    let mut non_zero_dct = false;
    for (i, levels) in blocks.iter().enumerate() {
        if levels.iter().all(|&l| l == 0) {
            continue;
        }
        non_zero_dct = true;

        let mut block: [i32; 16] = array::from_fn(|k| {
            let q = if k == 0 { segment.uvdc } else { segment.uvac };
            levels[k] * i32::from(q)
        });
        transform::idct4x4(&mut block);
        add_residue(ws, &block, 1 + (i / 2) * 4, 1 + (i % 2) * 4, CHROMA_STRIDE);
    }
    non_zero_dct
}
