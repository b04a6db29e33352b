//! Coefficient token coding (section 13), the reverse of the decoder's
//! coefficient reader.

use crate::common::types::*;

use super::prediction::{ChromaCoeffs, LumaCoeffs};

/// Token category for a magnitude of at least 5.
fn category_for(value: i32) -> i8 {
    match value {
        5..=6 => DCT_CAT1,
        7..=10 => DCT_CAT2,
        11..=18 => DCT_CAT3,
        19..=34 => DCT_CAT4,
        35..=66 => DCT_CAT5,
        _ => DCT_CAT6,
    }
}

impl super::Vp8Encoder<'_> {
    /// Codes the 25 blocks of a macroblock that was not skipped: Y2, the 16
    /// luma blocks without their DC, then four U and four V blocks.
    ///
    /// Each block's context is the number of its above and left neighbours
    /// that carried coefficients.
    pub(super) fn encode_residual_data(
        &mut self,
        luma: &LumaCoeffs,
        chroma: &ChromaCoeffs,
        mbx: usize,
        partition_index: usize,
    ) {
        let complexity = self.left_complexity.y2 + self.top_complexity[mbx].y2;
        let has_coeffs = self.encode_coefficients(
            &luma.y2,
            partition_index,
            Plane::Y2,
            complexity.into(),
        );
        self.left_complexity.y2 = u8::from(has_coeffs);
        self.top_complexity[mbx].y2 = u8::from(has_coeffs);

        for y in 0usize..4 {
            let mut left = self.left_complexity.y[y];
            for x in 0usize..4 {
                let top = self.top_complexity[mbx].y[x];
                let has_coeffs = self.encode_coefficients(
                    &luma.blocks[y * 4 + x],
                    partition_index,
                    Plane::YCoeff1,
                    (left + top).into(),
                );
                left = u8::from(has_coeffs);
                self.top_complexity[mbx].y[x] = left;
            }
            // set for the next macroblock
            self.left_complexity.y[y] = left;
        }

        for y in 0usize..2 {
            let mut left = self.left_complexity.u[y];
            for x in 0usize..2 {
                let top = self.top_complexity[mbx].u[x];
                let has_coeffs = self.encode_coefficients(
                    &chroma.u[y * 2 + x],
                    partition_index,
                    Plane::Chroma,
                    (left + top).into(),
                );
                left = u8::from(has_coeffs);
                self.top_complexity[mbx].u[x] = left;
            }
            self.left_complexity.u[y] = left;
        }

        for y in 0usize..2 {
            let mut left = self.left_complexity.v[y];
            for x in 0usize..2 {
                let top = self.top_complexity[mbx].v[x];
                let has_coeffs = self.encode_coefficients(
                    &chroma.v[y * 2 + x],
                    partition_index,
                    Plane::Chroma,
                    (left + top).into(),
                );
                left = u8::from(has_coeffs);
                self.top_complexity[mbx].v[x] = left;
            }
            self.left_complexity.v[y] = left;
        }
    }

    // writes the quantized levels of one block, which are in raster order;
    // returns whether the block had any nonzero level, the context of its
    // right and lower neighbours
    fn encode_coefficients(
        &mut self,
        levels: &[i32; 16],
        partition_index: usize,
        plane: Plane,
        complexity: usize,
    ) -> bool {
        debug_assert!(complexity <= 2);

        let encoder = &mut self.partitions[partition_index];
        let probs = &self.token_probs[plane as usize];

        let first_coeff = if plane == Plane::YCoeff1 { 1 } else { 0 };
        let mut complexity = complexity;

        let mut zigzag_block = [0i32; 16];
        for (i, coeff) in zigzag_block.iter_mut().enumerate().skip(first_coeff) {
            *coeff = levels[usize::from(ZIGZAG[i])];
        }

        // one past the last nonzero level, 0 if there is none
        let end_of_block_index = zigzag_block
            .iter()
            .rposition(|&x| x != 0)
            .map_or(0, |last| last + 1);

        let mut skip_eob = false;

        for index in first_coeff..end_of_block_index {
            let coeff = zigzag_block[index];

            let band = usize::from(COEFF_BANDS[index]);
            let probabilities = &probs[band][complexity];
            let start_index_token_tree = if skip_eob { 2 } else { 0 };

            let token = match coeff.abs() {
                0 => DCT_0,
                literal @ 1..=4 => literal as i8,
                value => category_for(value),
            };

            encoder.write_with_tree_start_index(
                &DCT_TOKEN_TREE,
                probabilities,
                token,
                start_index_token_tree,
            );

            if token >= DCT_CAT1 {
                let cat = (token - DCT_CAT1) as usize;
                let extra = coeff.abs() - i32::from(DCT_CAT_BASE[cat]);

                let mut mask = if token == DCT_CAT6 { 1 << 10 } else { 1 << cat };
                for &prob in PROB_DCT_CAT[cat].iter().take_while(|&&p| p > 0) {
                    encoder.write_bool(extra & mask != 0, prob);
                    mask >>= 1;
                }
            }

            // an end of block never follows a zero
            skip_eob = token == DCT_0;

            if token != DCT_0 {
                // the flag is set for negative levels
                encoder.write_flag(coeff < 0);
            }

            complexity = match token {
                DCT_0 => 0,
                DCT_1 => 1,
                _ => 2,
            };
        }

        if end_of_block_index < 16 {
            let band_index = usize::max(first_coeff, end_of_block_index);
            let band = usize::from(COEFF_BANDS[band_index]);
            let probabilities = &probs[band][complexity];
            encoder.write_with_tree(&DCT_TOKEN_TREE, probabilities, DCT_EOB);
        }

        end_of_block_index > 0
    }
}
