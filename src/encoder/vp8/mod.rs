//! VP8 keyframe encoder.
//!
//! ## Module organization
//!
//! - [`header`]: frame tag, compressed frame header, macroblock headers and
//!   partition layout
//! - [`mode_selection`]: closed-loop choice of the luma and chroma modes
//! - [`prediction`]: prediction, forward transform, quantization and
//!   reconstruction of one macroblock
//! - [`residuals`]: coefficient tokens
//!
//! ## Encoding pipeline
//!
//! 1. **Color conversion** (done by the caller): RGB → macroblock-aligned YUV 4:2:0
//! 2. **Mode selection**: for each macroblock, the luma and chroma modes with
//!    the lowest `SSE + lambda * rate` after quantization
//! 3. **Reconstruction**: the chosen modes' dequantized residuals are added
//!    back so later macroblocks predict from what the decoder will see
//! 4. **Entropy coding**: coefficient tokens go to the partition of the
//!    macroblock row, the macroblock headers to the first partition once the
//!    skip probability is known
//! 5. **Loop filter**: the same pass the decoder runs, applied to the
//!    reconstruction

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;

use log::debug;

use super::api::{EncodeError, EncodeStats, EncodedFrame};
use super::arithmetic::ArithmeticEncoder;
use super::vec_writer::VecWriter;
use crate::common::prediction::{BORDER_ABOVE, BORDER_LEFT};
use crate::common::types::*;
use crate::decoder::vp8::Frame;
use crate::decoder::yuv::YuvImage;
use crate::decoder::{filter_frame, FilterSettings, Planes};

mod header;
mod mode_selection;
mod prediction;
mod residuals;

/// Frame-level settings resolved from the encoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameParams {
    /// Quantizer index, `0..=127`.
    pub(crate) quant_index: u8,
    /// Loop filter level, `0..=63`. 0 disables the filter.
    pub(crate) filter_level: u8,
    /// Loop filter sharpness, `0..=7`.
    pub(crate) sharpness: u8,
    pub(crate) simple_filter: bool,
    /// 1, 2, 4 or 8.
    pub(crate) num_partitions: usize,
}

// the per-block "has coefficients" state of 13.3, one per column on top and
// one for the macroblock to the left
#[derive(Clone, Copy, Default)]
struct Complexity {
    y2: u8,
    y: [u8; 4],
    u: [u8; 2],
    v: [u8; 2],
}

impl Complexity {
    fn clear(&mut self, include_y2: bool) {
        self.y = [0; 4];
        self.u = [0; 2];
        self.v = [0; 2];
        if include_y2 {
            self.y2 = 0;
        }
    }
}

struct Vp8Encoder<'a> {
    source: &'a YuvImage,
    /// The reconstruction, which is what a decoder will output
    frame: Frame,
    params: FrameParams,

    mbwidth: usize,
    mbheight: usize,

    segment: Segment,
    lambda: u64,

    /// The encoder for the macroblock headers and the compressed frame header
    encoder: ArithmeticEncoder,
    /// Partitions of encoders for the macroblock coefficient data
    partitions: Vec<ArithmeticEncoder>,
    token_probs: Box<TokenProbTables>,
    macroblock_no_skip_coeff: Option<Prob>,

    macroblocks: Vec<MacroBlock>,

    top_complexity: Vec<Complexity>,
    left_complexity: Complexity,

    // the left borders used in prediction, corner first
    left_border_y: [u8; 16 + 1],
    left_border_u: [u8; 8 + 1],
    left_border_v: [u8; 8 + 1],

    // the top borders used in prediction
    top_border_y: Vec<u8>,
    top_border_u: Vec<u8>,
    top_border_v: Vec<u8>,

    stop: Option<&'a dyn enough::Stop>,
}

impl<'a> Vp8Encoder<'a> {
    fn new(
        source: &'a YuvImage,
        width: u16,
        height: u16,
        params: FrameParams,
        stop: Option<&'a dyn enough::Stop>,
    ) -> Self {
        let mut frame = Frame::with_dimensions(width, height);
        frame.filter_type = params.simple_filter;
        frame.filter_level = params.filter_level;
        frame.sharpness_level = params.sharpness;

        let mbwidth = usize::from(width.div_ceil(16));
        let mbheight = usize::from(height.div_ceil(16));

        let mut segment = Segment::default();
        segment.set_quantizers(i32::from(params.quant_index), 0, 0, 0, 0, 0);

        Self {
            source,
            frame,
            params,

            mbwidth,
            mbheight,

            segment,
            lambda: mode_selection::lambda_for_quant(params.quant_index),

            encoder: ArithmeticEncoder::new(),
            partitions: (0..params.num_partitions)
                .map(|_| ArithmeticEncoder::new())
                .collect(),
            token_probs: Box::new(COEFF_PROBS),
            macroblock_no_skip_coeff: None,

            macroblocks: Vec::with_capacity(mbwidth * mbheight),

            top_complexity: vec![Complexity::default(); mbwidth],
            left_complexity: Complexity::default(),

            left_border_y: [BORDER_LEFT; 16 + 1],
            left_border_u: [BORDER_LEFT; 8 + 1],
            left_border_v: [BORDER_LEFT; 8 + 1],

            // the above-right pixels of the last column read four bytes past the row
            top_border_y: vec![BORDER_ABOVE; mbwidth * 16 + 4],
            top_border_u: vec![BORDER_ABOVE; mbwidth * 8],
            top_border_v: vec![BORDER_ABOVE; mbwidth * 8],

            stop,
        }
    }

    fn encode(mut self) -> Result<EncodedFrame, EncodeError> {
        let mut sse = [0u64; 3];
        let mut skipped = 0u32;
        let mut luma_modes = [0u32; 4];

        for mby in 0..self.mbheight {
            if let Some(stop) = self.stop {
                stop.check()?;
            }

            self.left_complexity = Complexity::default();
            self.left_border_y = [BORDER_LEFT; 16 + 1];
            self.left_border_u = [BORDER_LEFT; 8 + 1];
            self.left_border_v = [BORDER_LEFT; 8 + 1];

            let p = mby % self.partitions.len();

            for mbx in 0..self.mbwidth {
                let luma = self.pick_luma_mode(mbx, mby);
                let chroma = self.pick_chroma_mode(mbx, mby);

                let mut mb = MacroBlock {
                    luma_mode: luma.mode,
                    chroma_mode: chroma.mode,
                    ..Default::default()
                };
                if let Some(mode) = luma.mode.into_intra() {
                    mb.bpred = [mode; 16];
                }

                mb.coeffs_skipped = luma.coeffs.is_zero() && chroma.coeffs.is_zero();
                if mb.coeffs_skipped {
                    skipped += 1;
                    self.left_complexity.clear(true);
                    self.top_complexity[mbx].clear(true);
                } else {
                    mb.non_zero_dct = luma.non_zero_dct || chroma.non_zero_dct;
                    self.encode_residual_data(&luma.coeffs, &chroma.coeffs, mbx, p);
                }

                sse[0] += luma.sse;
                sse[1] += chroma.sse_u;
                sse[2] += chroma.sse_v;
                luma_modes[luma.mode as usize] += 1;

                self.store_luma(mbx, mby, &luma.ws);
                self.store_chroma(mbx, mby, &chroma.uws, &chroma.vws);

                self.macroblocks.push(mb);
            }
        }

        let total = self.macroblocks.len() as u32;
        if total > 0 {
            let non_skipped = total - skipped;
            let prob = ((255 * non_skipped + total / 2) / total).min(255) as u8;
            self.macroblock_no_skip_coeff = Some(prob.clamp(1, 254));
        }

        self.encode_compressed_frame_header();
        let macroblocks = mem::take(&mut self.macroblocks);
        for mb in &macroblocks {
            self.write_macroblock_header(mb);
        }

        let first_partition = mem::take(&mut self.encoder).flush_and_get_buffer();
        let partitions: Vec<Vec<u8>> = mem::take(&mut self.partitions)
            .into_iter()
            .map(ArithmeticEncoder::flush_and_get_buffer)
            .collect();

        let mut data = Vec::with_capacity(
            10 + first_partition.len() + partitions.iter().map(|p| p.len() + 3).sum::<usize>(),
        );
        self.write_uncompressed_frame_header(&mut data, first_partition.len())?;
        data.write_all(&first_partition);
        write_partitions(&mut data, &partitions);

        debug!(
            "encoded {}x{} at q {}: {} of {} macroblocks skipped, modes DC/V/H/TM {:?}, {} bytes",
            self.frame.width,
            self.frame.height,
            self.params.quant_index,
            skipped,
            total,
            luma_modes,
            data.len()
        );

        self.loop_filter(&macroblocks);

        let luma_pixels = (self.mbwidth * 16 * self.mbheight * 16) as u64;
        let chroma_pixels = luma_pixels / 4;
        let stats = EncodeStats {
            coded_size: data.len() as u32,
            psnr: [
                sse_to_psnr(sse[0], luma_pixels),
                sse_to_psnr(sse[1], chroma_pixels),
                sse_to_psnr(sse[2], chroma_pixels),
                sse_to_psnr(sse.iter().sum(), luma_pixels + 2 * chroma_pixels),
            ],
            quant_index: self.params.quant_index,
            filter_level: self.params.filter_level,
            block_count: total,
            block_count_skip: skipped,
            luma_mode_counts: luma_modes,
            header_bytes: first_partition.len() as u32,
            partition_bytes: partitions.iter().map(|p| p.len() as u32).collect(),
        };

        Ok(EncodedFrame {
            data,
            reconstruction: self.frame,
            stats,
        })
    }

    /// Copies a reconstructed luma work buffer into the frame and keeps its
    /// edges as the borders of the next macroblocks.
    fn store_luma(&mut self, mbx: usize, mby: usize, ws: &[u8]) {
        use crate::common::prediction::{update_borders, LUMA_STRIDE};

        update_borders(
            ws,
            16,
            LUMA_STRIDE,
            mbx,
            &mut self.top_border_y,
            &mut self.left_border_y,
        );

        let buffer_width = self.frame.buffer_width();
        for (y, row) in ws.chunks_exact(LUMA_STRIDE).skip(1).enumerate() {
            let offset = (mby * 16 + y) * buffer_width + mbx * 16;
            self.frame.ybuf[offset..][..16].copy_from_slice(&row[1..][..16]);
        }
    }

    fn store_chroma(&mut self, mbx: usize, mby: usize, uws: &[u8], vws: &[u8]) {
        use crate::common::prediction::{update_borders, CHROMA_STRIDE};

        update_borders(
            uws,
            8,
            CHROMA_STRIDE,
            mbx,
            &mut self.top_border_u,
            &mut self.left_border_u,
        );
        update_borders(
            vws,
            8,
            CHROMA_STRIDE,
            mbx,
            &mut self.top_border_v,
            &mut self.left_border_v,
        );

        let chroma_width = self.frame.chroma_buffer_width();
        for (y, (urow, vrow)) in uws
            .chunks_exact(CHROMA_STRIDE)
            .zip(vws.chunks_exact(CHROMA_STRIDE))
            .skip(1)
            .take(8)
            .enumerate()
        {
            let offset = (mby * 8 + y) * chroma_width + mbx * 8;
            self.frame.ubuf[offset..][..8].copy_from_slice(&urow[1..][..8]);
            self.frame.vbuf[offset..][..8].copy_from_slice(&vrow[1..][..8]);
        }
    }

    fn loop_filter(&mut self, macroblocks: &[MacroBlock]) {
        let settings = FilterSettings {
            simple: self.params.simple_filter,
            level: self.params.filter_level,
            sharpness: self.params.sharpness,
            segments: None,
            adjustments: None,
        };
        let planes = Planes {
            y: &mut self.frame.ybuf,
            u: &mut self.frame.ubuf,
            v: &mut self.frame.vbuf,
            mbwidth: self.mbwidth,
            mbheight: self.mbheight,
        };
        filter_frame(&settings, planes, macroblocks);
    }
}

/// Appends the partition size table and the coefficient partitions.
fn write_partitions(writer: &mut Vec<u8>, partitions: &[Vec<u8>]) {
    // every partition but the last is preceded by its size
    if let Some((_, sized)) = partitions.split_last() {
        for partition in sized {
            writer.write_u24_le(partition.len() as u32);
        }
    }
    for partition in partitions {
        writer.write_all(partition);
    }
}

/// Convert SSE to PSNR in dB. Returns 99.0 for perfect reconstruction (SSE=0).
fn sse_to_psnr(sse: u64, num_pixels: u64) -> f32 {
    if sse == 0 || num_pixels == 0 {
        99.0
    } else {
        let mse = sse as f64 / num_pixels as f64;
        (10.0 * libm::log10(255.0 * 255.0 / mse)) as f32
    }
}

/// Encodes one keyframe from macroblock-aligned planes.
///
/// `width` and `height` must be in `1..=16383`; the caller validates them.
pub(crate) fn encode_frame<'a>(
    source: &'a YuvImage,
    width: u16,
    height: u16,
    params: FrameParams,
    stop: Option<&'a dyn enough::Stop>,
) -> Result<EncodedFrame, EncodeError> {
    debug_assert!(matches!(params.num_partitions, 1 | 2 | 4 | 8));
    Vp8Encoder::new(source, width, height, params, stop).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::vp8::Vp8Decoder;
    use crate::decoder::yuv::import_yuv420;

    fn params(quant_index: u8, filter_level: u8) -> FrameParams {
        FrameParams {
            quant_index,
            filter_level,
            sharpness: 0,
            simple_filter: false,
            num_partitions: 1,
        }
    }

    fn gradient(width: usize, height: usize) -> YuvImage {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width.max(2) + y * 3) as u8);
            }
        }
        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        for y in 0..ch {
            for x in 0..cw {
                data.push((96 + x * 2 + y) as u8);
            }
        }
        for y in 0..ch {
            for x in 0..cw {
                data.push((160 - x - y * 2) as u8);
            }
        }
        import_yuv420(&data, width, height)
    }

    #[test]
    fn flat_gray_frame_skips_everything() {
        let source = import_yuv420(&[128; 16 * 16 + 2 * 64], 16, 16);
        let encoded = encode_frame(&source, 16, 16, params(40, 0), None).unwrap();
        assert_eq!(encoded.stats.block_count, 1);
        assert_eq!(encoded.stats.block_count_skip, 1);
        assert!(encoded.reconstruction.ybuf.iter().all(|&p| p == 128));
        assert_eq!(encoded.stats.psnr[0], 99.0);
    }

    #[test]
    fn decoder_reproduces_reconstruction() {
        for (width, height, partitions, filter_level) in
            [(48, 32, 1, 0), (37, 21, 2, 20), (70, 50, 4, 40)]
        {
            let source = gradient(width, height);
            let frame_params = FrameParams {
                num_partitions: partitions,
                ..params(30, filter_level)
            };
            let encoded =
                encode_frame(&source, width as u16, height as u16, frame_params, None).unwrap();
            let decoded = Vp8Decoder::decode_frame(&encoded.data).unwrap();
            assert_eq!(decoded, encoded.reconstruction, "{width}x{height}");
        }
    }

    #[test]
    fn partition_table_precedes_partitions() {
        let mut out = Vec::new();
        write_partitions(&mut out, &[vec![1, 2], vec![3], vec![4, 5, 6]]);
        assert_eq!(out, [2, 0, 0, 1, 0, 0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn psnr_of_identical_planes() {
        assert_eq!(sse_to_psnr(0, 256), 99.0);
        let psnr = sse_to_psnr(256, 256);
        assert!((psnr - 48.13).abs() < 0.01, "{psnr}");
    }
}
