//! VP8 bitstream header encoding.
//!
//! Writes the uncompressed frame tag, the compressed frame header and the
//! per-macroblock headers, in exactly the order the decoder reads them.

use alloc::format;
use alloc::vec::Vec;

use crate::common::types::*;
use crate::decoder::vp8::KEYFRAME_START_CODE;
use crate::encoder::api::EncodeError;
use crate::encoder::vec_writer::VecWriter;

/// The frame tag stores the first partition size in 19 bits.
const MAX_FIRST_PARTITION_SIZE: usize = (1 << 19) - 1;

impl super::Vp8Encoder<'_> {
    pub(super) fn write_uncompressed_frame_header(
        &self,
        writer: &mut Vec<u8>,
        partition_size: usize,
    ) -> Result<(), EncodeError> {
        if partition_size > MAX_FIRST_PARTITION_SIZE {
            return Err(EncodeError::InvalidParameter(format!(
                "first partition of {partition_size} bytes does not fit the frame tag"
            )));
        }

        let version = u32::from(self.frame.version);
        let for_display = u32::from(self.frame.for_display);

        let keyframe_bit = 0;
        let tag = ((partition_size as u32) << 5) | (for_display << 4) | (version << 1) | keyframe_bit;
        writer.write_u24_le(tag);

        writer.write_all(&KEYFRAME_START_CODE);

        // no upscaling
        writer.write_u16_le(self.frame.width & 0x3FFF);
        writer.write_u16_le(self.frame.height & 0x3FFF);

        Ok(())
    }

    pub(super) fn encode_compressed_frame_header(&mut self) {
        // if keyframe, color space must be 0
        self.encoder.write_literal(1, 0);
        // pixel type
        self.encoder.write_literal(1, self.frame.pixel_type);

        // segmentation
        self.encoder.write_flag(false);

        self.encoder.write_flag(self.frame.filter_type);
        self.encoder.write_literal(6, self.frame.filter_level);
        self.encoder.write_literal(3, self.frame.sharpness_level);

        // loop filter adjustments
        self.encoder.write_flag(false);

        // partitions length must be 1, 2, 4 or 8, so value will be 0, 1, 2 or 3
        let partitions_value = self.partitions.len().trailing_zeros() as u8;
        self.encoder.write_literal(2, partitions_value);

        self.encode_quantization_indices();

        // refresh entropy probs
        self.encoder.write_literal(1, 0);

        self.encode_token_probabilities();

        self.encoder
            .write_flag(self.macroblock_no_skip_coeff.is_some());
        if let Some(prob_skip_false) = self.macroblock_no_skip_coeff {
            self.encoder.write_literal(8, prob_skip_false);
        }
    }

    fn encode_quantization_indices(&mut self) {
        self.encoder.write_literal(7, self.params.quant_index);
        // ydc, y2dc, y2ac, uvdc and uvac all use the base index
        for _ in 0..5 {
            self.encoder.write_optional_signed_value(4, None);
        }
    }

    /// Signals "no update" for every coefficient probability, so the
    /// partitions are coded with the default tables.
    fn encode_token_probabilities(&mut self) {
        debug_assert!(*self.token_probs == COEFF_PROBS);
        for &update_prob in COEFF_UPDATE_PROBS.iter().flatten().flatten().flatten() {
            self.encoder.write_bool(false, update_prob);
        }
    }

    pub(super) fn write_macroblock_header(&mut self, macroblock: &MacroBlock) {
        debug_assert!(macroblock.luma_mode != LumaMode::B);

        if let Some(prob) = self.macroblock_no_skip_coeff {
            self.encoder.write_bool(macroblock.coeffs_skipped, prob);
        }

        self.encoder.write_with_tree(
            &KEYFRAME_YMODE_TREE,
            &KEYFRAME_YMODE_PROBS,
            macroblock.luma_mode as i8,
        );

        self.encoder.write_with_tree(
            &KEYFRAME_UV_MODE_TREE,
            &KEYFRAME_UV_MODE_PROBS,
            macroblock.chroma_mode as i8,
        );
    }
}
