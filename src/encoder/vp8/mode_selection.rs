//! Closed-loop choice of the whole-block luma and chroma modes.
//!
//! Every admissible mode is predicted, quantized and reconstructed; the
//! score weighs the reconstruction error against an estimate of the bits
//! the mode and its surviving coefficients will take. The winner's
//! reconstruction is kept, so nothing has to be redone once chosen.

use crate::common::prediction::{CHROMA_BLOCK_SIZE, CHROMA_STRIDE, LUMA_BLOCK_SIZE, LUMA_STRIDE};
use crate::common::types::{ChromaMode, LumaMode};

use super::prediction::{
    quantize_chroma, quantize_luma, reconstruct_chroma, reconstruct_luma, sse_block,
    ChromaCoeffs, LumaCoeffs,
};

/// Cost of signalling each luma mode, in 1/256 bit, in `DC, V, H, TM` order.
pub(super) const FIXED_COSTS_I16: [u16; 4] = [663, 919, 872, 919];
/// Cost of signalling each chroma mode, in 1/256 bit.
pub(super) const FIXED_COSTS_UV: [u16; 4] = [302, 984, 439, 642];

/// Flat estimate of one nonzero level (about five bits).
const NONZERO_LEVEL_COST: u64 = 1280;

/// Distortion is scaled to the 1/256 bit units of the rate.
const RD_DISTO_MULT: u64 = 256;

const LUMA_MODES: [LumaMode; 4] = [LumaMode::DC, LumaMode::V, LumaMode::H, LumaMode::TM];
const CHROMA_MODES: [ChromaMode; 4] = [ChromaMode::DC, ChromaMode::V, ChromaMode::H, ChromaMode::TM];

/// Rate weight for a quantizer index: coarser quantizers trade more
/// distortion for fewer bits.
pub(super) fn lambda_for_quant(quant_index: u8) -> u64 {
    match quant_index {
        0..37 => 1,
        37..75 => 2,
        75..112 => 3,
        _ => 4,
    }
}

/// Whether a mode's prediction only reads neighbors that exist.
///
/// The modes are listed `DC, V, H, TM`: V needs the row above, H the column
/// to the left and TM both.
fn is_admissible(mode_index: usize, mbx: usize, mby: usize) -> bool {
    match mode_index {
        1 => mby > 0,
        2 => mbx > 0,
        3 => mbx > 0 && mby > 0,
        _ => true,
    }
}

fn rd_score(sse: u64, fixed_cost: u16, nonzero: u32, lambda: u64) -> u64 {
    let rate = u64::from(fixed_cost) + u64::from(nonzero) * NONZERO_LEVEL_COST;
    sse * RD_DISTO_MULT + lambda * rate
}

pub(super) struct LumaChoice {
    pub(super) mode: LumaMode,
    pub(super) coeffs: LumaCoeffs,
    pub(super) non_zero_dct: bool,
    pub(super) sse: u64,
    /// The reconstructed work buffer.
    pub(super) ws: [u8; LUMA_BLOCK_SIZE],
}

pub(super) struct ChromaChoice {
    pub(super) mode: ChromaMode,
    pub(super) coeffs: ChromaCoeffs,
    pub(super) non_zero_dct: bool,
    pub(super) sse_u: u64,
    pub(super) sse_v: u64,
    pub(super) uws: [u8; CHROMA_BLOCK_SIZE],
    pub(super) vws: [u8; CHROMA_BLOCK_SIZE],
}

impl super::Vp8Encoder<'_> {
    pub(super) fn pick_luma_mode(&self, mbx: usize, mby: usize) -> LumaChoice {
        // DC is always admissible
        let (mut best_score, mut best) = self.evaluate_luma(mbx, mby, 0);
        for mode_index in 1..LUMA_MODES.len() {
            if !is_admissible(mode_index, mbx, mby) {
                continue;
            }
            let (score, choice) = self.evaluate_luma(mbx, mby, mode_index);
            if score < best_score {
                best_score = score;
                best = choice;
            }
        }
        best
    }

    fn evaluate_luma(&self, mbx: usize, mby: usize, mode_index: usize) -> (u64, LumaChoice) {
        let stride = self.mbwidth * 16;
        let mode = LUMA_MODES[mode_index];

        let mut ws = self.predicted_luma(mbx, mby, mode);
        let coeffs = quantize_luma(&self.source.y, stride, mbx, mby, &ws, &self.segment);
        let non_zero_dct = reconstruct_luma(&mut ws, &coeffs, &self.segment);
        let sse = sse_block(&self.source.y, stride, mbx * 16, mby * 16, &ws, LUMA_STRIDE, 16);

        let score = rd_score(
            sse,
            FIXED_COSTS_I16[mode_index],
            coeffs.nonzero_count(),
            self.lambda,
        );
        let choice = LumaChoice {
            mode,
            coeffs,
            non_zero_dct,
            sse,
            ws,
        };
        (score, choice)
    }

    pub(super) fn pick_chroma_mode(&self, mbx: usize, mby: usize) -> ChromaChoice {
        let (mut best_score, mut best) = self.evaluate_chroma(mbx, mby, 0);
        for mode_index in 1..CHROMA_MODES.len() {
            if !is_admissible(mode_index, mbx, mby) {
                continue;
            }
            let (score, choice) = self.evaluate_chroma(mbx, mby, mode_index);
            if score < best_score {
                best_score = score;
                best = choice;
            }
        }
        best
    }

    fn evaluate_chroma(&self, mbx: usize, mby: usize, mode_index: usize) -> (u64, ChromaChoice) {
        let stride = self.mbwidth * 8;
        let mode = CHROMA_MODES[mode_index];

        let (mut uws, mut vws) = self.predicted_chroma(mbx, mby, mode);
        let coeffs = ChromaCoeffs {
            u: quantize_chroma(&self.source.u, stride, mbx, mby, &uws, &self.segment),
            v: quantize_chroma(&self.source.v, stride, mbx, mby, &vws, &self.segment),
        };
        let u_nonzero = reconstruct_chroma(&mut uws, &coeffs.u, &self.segment);
        let v_nonzero = reconstruct_chroma(&mut vws, &coeffs.v, &self.segment);

        let (x, y) = (mbx * 8, mby * 8);
        let sse_u = sse_block(&self.source.u, stride, x, y, &uws, CHROMA_STRIDE, 8);
        let sse_v = sse_block(&self.source.v, stride, x, y, &vws, CHROMA_STRIDE, 8);

        let score = rd_score(
            sse_u + sse_v,
            FIXED_COSTS_UV[mode_index],
            coeffs.nonzero_count(),
            self.lambda,
        );
        let choice = ChromaChoice {
            mode,
            coeffs,
            non_zero_dct: u_nonzero || v_nonzero,
            sse_u,
            sse_v,
            uws,
            vws,
        };
        (score, choice)
    }
}
