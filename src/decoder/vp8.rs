//! An implementation of the VP8 Video Codec
//!
//! This module contains a partial implementation of the
//! VP8 video format as defined in RFC-6386.
//!
//! It decodes Keyframes only.
//! VP8 is the underpinning of the WebP image format
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide
//! * [VP8.pdf](http://static.googleusercontent.com/media/research.google.com/en//pubs/archive/37073.pdf) - An overview of of the VP8 format

use alloc::boxed::Box;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use core::array;

use log::{debug, trace, warn};

use super::api::{DecodeError, UpsamplingMethod};
use super::arithmetic::BoolReader;
use super::limits::Limits;
use super::loop_filter::{filter_frame, FilterSettings, Planes};
use super::yuv;
use crate::common::prediction::*;
use crate::common::transform;
use crate::common::types::*;
use crate::slice_reader::SliceReader;

/// Start code following the frame tag of every keyframe.
pub(crate) const KEYFRAME_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Frame tag, start code and the two dimension fields.
pub(crate) const KEYFRAME_HEADER_SIZE: usize = 10;

/// Info required from a previously decoded macro block in future
/// For the top macroblocks this will be the bottom values, for the left macroblock the right values
#[derive(Default, Clone, Copy)]
struct PreviousMacroBlock {
    bpred: [IntraMode; 4],
    // complexity is laid out like: y2,y,y,y,y,u,u,v,v
    complexity: [u8; 9],
}

/// A decoded (or reconstructed) VP8 keyframe.
///
/// The planes are macroblock aligned: `ybuf` has
/// [`buffer_width`](Self::buffer_width) bytes per row and `ceil(height / 16) * 16`
/// rows, the chroma planes half of that in both directions. Pixels outside
/// `width x height` are decoded padding.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The width of the luma plane
    pub width: u16,

    /// The height of the luma plane
    pub height: u16,

    /// The luma plane of the frame
    pub ybuf: Vec<u8>,

    /// The blue plane of the frame
    pub ubuf: Vec<u8>,

    /// The red plane of the frame
    pub vbuf: Vec<u8>,

    /// Bitstream version from the frame tag (0-3)
    pub version: u8,

    /// Indicates whether this frame is intended for display
    pub for_display: bool,

    // Section 9.2
    /// The pixel type (clamping type) of the frame as defined by Section 9.2
    /// of RFC 6386
    pub pixel_type: u8,

    // Section 9.4 and 15
    /// Whether the simple loop filter is used instead of the normal one
    pub filter_type: bool,
    /// Frame-level loop filter strength, 0-63
    pub filter_level: u8,
    /// Loop filter sharpness, 0-7
    pub sharpness_level: u8,
}

impl Frame {
    /// Allocates macroblock-aligned planes for a `width x height` frame.
    pub(crate) fn with_dimensions(width: u16, height: u16) -> Self {
        let mbwidth = usize::from(width.div_ceil(16));
        let mbheight = usize::from(height.div_ceil(16));
        Self {
            width,
            height,
            ybuf: vec![0; mbwidth * 16 * mbheight * 16],
            ubuf: vec![0; mbwidth * 8 * mbheight * 8],
            vbuf: vec![0; mbwidth * 8 * mbheight * 8],
            for_display: true,
            ..Default::default()
        }
    }

    /// Width of the visible chroma area.
    #[must_use]
    pub const fn chroma_width(&self) -> u16 {
        self.width.div_ceil(2)
    }

    /// Height of the visible chroma area.
    #[must_use]
    pub const fn chroma_height(&self) -> u16 {
        self.height.div_ceil(2)
    }

    /// Distance in bytes between two luma rows.
    #[must_use]
    pub const fn buffer_width(&self) -> usize {
        self.width.div_ceil(16) as usize * 16
    }

    /// Distance in bytes between two chroma rows.
    #[must_use]
    pub const fn chroma_buffer_width(&self) -> usize {
        self.buffer_width() / 2
    }

    /// Fills an rgb buffer from the YUV buffers
    pub(crate) fn fill_rgb(&self, buf: &mut [u8], upsampling_method: UpsamplingMethod) {
        self.fill::<3>(buf, upsampling_method);
    }

    /// Fills an rgba buffer from the YUV buffers
    pub(crate) fn fill_rgba(&self, buf: &mut [u8], upsampling_method: UpsamplingMethod) {
        self.fill::<4>(buf, upsampling_method);
    }

    fn fill<const BPP: usize>(&self, buf: &mut [u8], upsampling_method: UpsamplingMethod) {
        let fill = match upsampling_method {
            UpsamplingMethod::Bilinear => yuv::fill_rgb_buffer_fancy::<BPP>,
            UpsamplingMethod::Simple => yuv::fill_rgb_buffer_simple::<BPP>,
        };
        fill(
            buf,
            &self.ybuf,
            &self.ubuf,
            &self.vbuf,
            usize::from(self.width),
            usize::from(self.height),
            self.buffer_width(),
        );
    }
}

/// The uncompressed part of a keyframe header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameTag {
    pub(crate) version: u8,
    pub(crate) for_display: bool,
    pub(crate) first_partition_size: usize,
    pub(crate) width: u16,
    pub(crate) height: u16,
}

impl FrameTag {
    /// Parses the frame tag, start code and dimensions.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = SliceReader::new(data);
        let tag = r.read_u24_le()?;

        let keyframe = tag & 1 == 0;
        if !keyframe {
            return Err(DecodeError::UnsupportedFeature(
                "Non-keyframe frames".into(),
            ));
        }

        let version = ((tag >> 1) & 7) as u8;
        let for_display = (tag >> 4) & 1 != 0;
        let first_partition_size = (tag >> 5) as usize;

        let mut magic = [0u8; 3];
        r.read_exact(&mut magic)?;
        if magic != KEYFRAME_START_CODE {
            return Err(DecodeError::InvalidMagic(magic));
        }

        let w = r.read_u16_le()?;
        let h = r.read_u16_le()?;
        if w >> 14 != 0 || h >> 14 != 0 {
            warn!(
                "ignoring upscaling request {}x{} in frame header",
                w >> 14,
                h >> 14
            );
        }

        let width = w & 0x3FFF;
        let height = h & 0x3FFF;
        if width == 0 || height == 0 {
            return Err(DecodeError::BitstreamCorruption);
        }

        Ok(Self {
            version,
            for_display,
            first_partition_size,
            width,
            height,
        })
    }
}

/// Reads coefficient tokens for one 4x4 block.
///
/// Dequantized values are stored in raster order. Returns whether any token
/// past `first` was decoded, which becomes the block's context for its
/// right and lower neighbours.
fn read_coefficients(
    reader: &mut BoolReader<'_>,
    output: &mut [i32],
    probs: &[[[Prob; NUM_DCT_TOKENS - 1]; 3]; 8],
    first: usize,
    complexity: usize,
    dcq: i16,
    acq: i16,
) -> bool {
    debug_assert!(complexity <= 2);
    debug_assert!(output.len() >= 16);

    let mut n = first;
    let mut prob = &probs[usize::from(COEFF_BANDS[n])][complexity];

    while n < 16 {
        if !reader.read_bool(prob[0]) {
            // end of block
            break;
        }

        // a zero token is never followed by an end of block
        while !reader.read_bool(prob[1]) {
            n += 1;
            if n >= 16 {
                return true;
            }
            prob = &probs[usize::from(COEFF_BANDS[n])][0];
        }

        let v: i32;
        let next_ctx: usize;

        if !reader.read_bool(prob[2]) {
            v = 1;
            next_ctx = 1;
        } else {
            if !reader.read_bool(prob[3]) {
                if !reader.read_bool(prob[4]) {
                    v = 2;
                } else {
                    v = 3 + reader.read_bit(prob[5]);
                }
            } else if !reader.read_bool(prob[6]) {
                if !reader.read_bool(prob[7]) {
                    // cat1
                    v = 5 + reader.read_bit(159);
                } else {
                    // cat2
                    v = 7 + 2 * reader.read_bit(165) + reader.read_bit(145);
                }
            } else {
                // cat3 to cat6
                let bit1 = reader.read_bit(prob[8]);
                let bit0 = reader.read_bit(prob[9 + bit1 as usize]);
                let cat = (2 * bit1 + bit0) as usize;

                let mut extra = 0i32;
                for &p in PROB_DCT_CAT[2 + cat].iter().take_while(|&&p| p > 0) {
                    extra = extra + extra + reader.read_bit(p);
                }
                v = 3 + (8 << cat) + extra;
            }
            next_ctx = 2;
        }

        let signed_v = if reader.read_flag() { -v } else { v };

        let zigzag = usize::from(ZIGZAG[n]);
        let q = if zigzag > 0 { acq } else { dcq };
        output[zigzag] = signed_v * i32::from(q);

        n += 1;
        if n < 16 {
            prob = &probs[usize::from(COEFF_BANDS[n])][next_ctx];
        }
    }

    n > first
}

/// VP8 Decoder
///
/// Only decodes keyframes
pub struct Vp8Decoder<'a> {
    data: &'a [u8],
    b: BoolReader<'a>,
    first_partition_size: usize,

    mbwidth: u16,
    mbheight: u16,
    macroblocks: Vec<MacroBlock>,

    frame: Frame,

    segments_enabled: bool,
    segments_update_map: bool,
    segment: [Segment; MAX_SEGMENTS],

    loop_filter_adjustments_enabled: bool,
    ref_delta: [i32; 4],
    mode_delta: [i32; 4],

    partitions: Vec<BoolReader<'a>>,

    segment_tree_nodes: [TreeNode; 3],
    token_probs: Box<TokenProbTables>,

    // Section 9.11
    prob_skip_false: Option<Prob>,

    top: Vec<PreviousMacroBlock>,
    left: PreviousMacroBlock,

    // The borders from the previous macroblock, used for predictions
    // See Section 12
    // Note that the left border contains the top left pixel
    top_border_y: Vec<u8>,
    left_border_y: Vec<u8>,

    top_border_u: Vec<u8>,
    left_border_u: Vec<u8>,

    top_border_v: Vec<u8>,
    left_border_v: Vec<u8>,

    // Dequantized coefficients of the current macroblock: 16 luma blocks,
    // then 4 U and 4 V. Kept zeroed between macroblocks.
    coeff_blocks: [i32; 384],

    // Cooperative cancellation token
    stop: Option<&'a dyn enough::Stop>,
}

impl<'a> Vp8Decoder<'a> {
    /// Decodes a raw VP8 keyframe payload (the contents of a `VP8 ` chunk)
    /// with the default [`Limits`].
    pub fn decode_frame(data: &'a [u8]) -> Result<Frame, DecodeError> {
        Self::decode_frame_with(data, &Limits::default(), None)
    }

    /// Decodes a raw VP8 keyframe payload, enforcing `limits` and checking
    /// `stop` once per macroblock row.
    pub fn decode_frame_with(
        data: &'a [u8],
        limits: &Limits,
        stop: Option<&'a dyn enough::Stop>,
    ) -> Result<Frame, DecodeError> {
        let mut decoder = Self::new(data, limits)?;
        decoder.stop = stop;
        decoder.read_frame_header()?;
        decoder.decode_macroblocks()?;
        decoder.loop_filter();
        Ok(decoder.frame)
    }

    /// Parses the uncompressed header and allocates the frame.
    fn new(data: &'a [u8], limits: &Limits) -> Result<Self, DecodeError> {
        let tag = FrameTag::parse(data)?;
        limits.check_dimensions(u32::from(tag.width), u32::from(tag.height))?;

        let mbwidth = tag.width.div_ceil(16);
        let mbheight = tag.height.div_ceil(16);
        let luma_size = u64::from(mbwidth) * 16 * u64::from(mbheight) * 16;
        limits.check_memory(luma_size + luma_size / 2)?;

        let first_partition = data
            .get(KEYFRAME_HEADER_SIZE..)
            .and_then(|rest| rest.get(..tag.first_partition_size))
            .ok_or(DecodeError::StreamTruncated)?;

        let mut frame = Frame::with_dimensions(tag.width, tag.height);
        frame.version = tag.version;
        frame.for_display = tag.for_display;
        if tag.version > 3 {
            warn!("unknown bitstream version {}, decoding as 3", tag.version);
        }

        let mbw = usize::from(mbwidth);
        Ok(Self {
            data,
            b: BoolReader::new(first_partition),
            first_partition_size: tag.first_partition_size,

            mbwidth,
            mbheight,
            macroblocks: Vec::with_capacity(mbw * usize::from(mbheight)),

            frame,

            segments_enabled: false,
            segments_update_map: false,
            segment: array::from_fn(|_| Segment::default()),

            loop_filter_adjustments_enabled: false,
            ref_delta: [0; 4],
            mode_delta: [0; 4],

            partitions: Vec::new(),

            segment_tree_nodes: SEGMENT_TREE_NODE_DEFAULTS,
            token_probs: Box::new(COEFF_PROBS),

            prob_skip_false: None,

            top: vec![PreviousMacroBlock::default(); mbw],
            left: PreviousMacroBlock::default(),

            // the above-right pixels of the last column read four bytes past the row
            top_border_y: vec![BORDER_ABOVE; mbw * 16 + 4],
            left_border_y: vec![BORDER_LEFT; 1 + 16],

            top_border_u: vec![BORDER_ABOVE; mbw * 8],
            left_border_u: vec![BORDER_LEFT; 1 + 8],

            top_border_v: vec![BORDER_ABOVE; mbw * 8],
            left_border_v: vec![BORDER_LEFT; 1 + 8],

            coeff_blocks: [0i32; 384],

            stop: None,
        })
    }

    fn update_token_probabilities(&mut self) {
        for (i, is) in COEFF_UPDATE_PROBS.iter().enumerate() {
            for (j, js) in is.iter().enumerate() {
                for (k, ks) in js.iter().enumerate() {
                    for (t, &update_prob) in ks.iter().enumerate() {
                        if self.b.read_bool(update_prob) {
                            self.token_probs[i][j][k][t] = self.b.read_literal(8);
                        }
                    }
                }
            }
        }
    }

    /// Splits the data after the first partition into coefficient partitions.
    fn init_partitions(&mut self, n: usize) -> Result<(), DecodeError> {
        let mut r = SliceReader::new(self.data);
        r.skip(KEYFRAME_HEADER_SIZE + self.first_partition_size)?;

        let mut sizes = SliceReader::new(r.take_slice(3 * (n - 1))?);
        for i in 0..n - 1 {
            let size = sizes.read_u24_le()? as usize;
            let partition = r.take_slice(size)?;
            trace!("partition {i}: {size} bytes");
            self.partitions.push(BoolReader::new(partition));
        }

        // the last partition takes whatever is left
        let size = r.remaining();
        let partition = r.take_slice(size)?;
        trace!("partition {}: {size} bytes", n - 1);
        self.partitions.push(BoolReader::new(partition));

        Ok(())
    }

    fn read_quantization_indices(&mut self) {
        fn dq_delta(b: &mut BoolReader<'_>) -> i32 {
            b.read_optional_signed_value(4)
        }

        let yac_abs = i32::from(self.b.read_literal(7));
        let ydc_delta = dq_delta(&mut self.b);
        let y2dc_delta = dq_delta(&mut self.b);
        let y2ac_delta = dq_delta(&mut self.b);
        let uvdc_delta = dq_delta(&mut self.b);
        let uvac_delta = dq_delta(&mut self.b);

        let n = if self.segments_enabled {
            MAX_SEGMENTS
        } else {
            1
        };
        for segment in &mut self.segment[..n] {
            let base = if !self.segments_enabled {
                yac_abs
            } else if segment.delta_values {
                i32::from(segment.quantizer_level) + yac_abs
            } else {
                i32::from(segment.quantizer_level)
            };

            segment.set_quantizers(
                base, ydc_delta, y2dc_delta, y2ac_delta, uvdc_delta, uvac_delta,
            );
        }

        debug!(
            "quantizer index {yac_abs}, deltas ydc {ydc_delta} y2dc {y2dc_delta} y2ac {y2ac_delta} uvdc {uvdc_delta} uvac {uvac_delta}"
        );
    }

    fn read_loop_filter_adjustments(&mut self) {
        if self.b.read_flag() {
            for i in 0usize..4 {
                self.ref_delta[i] = self.b.read_optional_signed_value(6);
            }

            for i in 0usize..4 {
                self.mode_delta[i] = self.b.read_optional_signed_value(6);
            }
        }
    }

    fn read_segment_updates(&mut self) {
        // Section 9.3
        self.segments_update_map = self.b.read_flag();
        let update_segment_feature_data = self.b.read_flag();

        if update_segment_feature_data {
            let segment_feature_mode = !self.b.read_flag();

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].delta_values = segment_feature_mode;
            }

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].quantizer_level = self.b.read_optional_signed_value(7) as i8;
            }

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].loopfilter_level = self.b.read_optional_signed_value(6) as i8;
            }
        }

        if self.segments_update_map {
            let mut probs = [255u8; 3];
            for prob in probs.iter_mut() {
                if self.b.read_flag() {
                    *prob = self.b.read_literal(8);
                }
            }
            self.segment_tree_nodes = segment_tree_nodes(probs);
        }
    }

    fn read_frame_header(&mut self) -> Result<(), DecodeError> {
        let color_space = self.b.read_literal(1);
        self.frame.pixel_type = self.b.read_literal(1);

        if color_space != 0 {
            return Err(DecodeError::UnsupportedFeature(format!(
                "color space {color_space}"
            )));
        }

        self.segments_enabled = self.b.read_flag();
        if self.segments_enabled {
            self.read_segment_updates();
        }

        self.frame.filter_type = self.b.read_flag();
        self.frame.filter_level = self.b.read_literal(6);
        self.frame.sharpness_level = self.b.read_literal(3);

        self.loop_filter_adjustments_enabled = self.b.read_flag();
        if self.loop_filter_adjustments_enabled {
            self.read_loop_filter_adjustments();
        }

        let num_partitions = 1usize << self.b.read_literal(2);
        self.init_partitions(num_partitions)?;

        self.read_quantization_indices();

        // refresh_entropy_probs only matters for the frames that follow
        let _ = self.b.read_flag();

        self.update_token_probabilities();

        let mb_no_skip_coeff = self.b.read_flag();
        self.prob_skip_false = if mb_no_skip_coeff {
            Some(self.b.read_literal(8))
        } else {
            None
        };

        self.b.check(())?;

        debug!(
            "VP8 keyframe {}x{} v{}: {} partition(s), segments {}, {} filter level {} sharpness {}, skip prob {:?}",
            self.frame.width,
            self.frame.height,
            self.frame.version,
            num_partitions,
            self.segments_enabled,
            if self.frame.filter_type { "simple" } else { "normal" },
            self.frame.filter_level,
            self.frame.sharpness_level,
            self.prob_skip_false,
        );

        Ok(())
    }

    fn read_macroblock_header(&mut self, mbx: usize) -> Result<MacroBlock, DecodeError> {
        let mut mb = MacroBlock::default();

        if self.segments_enabled && self.segments_update_map {
            mb.segmentid = self.b.read_with_tree(&self.segment_tree_nodes) as u8;
        };

        mb.coeffs_skipped = if let Some(prob) = self.prob_skip_false {
            self.b.read_bool(prob)
        } else {
            false
        };

        let luma = self.b.read_with_tree(&KEYFRAME_YMODE_NODES);
        mb.luma_mode = LumaMode::from_i8(luma).ok_or(DecodeError::BitstreamCorruption)?;

        match mb.luma_mode.into_intra() {
            // `LumaMode::B` - This is predicted individually
            None => {
                for y in 0usize..4 {
                    for x in 0usize..4 {
                        let top = self.top[mbx].bpred[x];
                        let left = self.left.bpred[y];
                        let intra = self.b.read_with_tree(
                            &KEYFRAME_BPRED_MODE_NODES[top as usize][left as usize],
                        );
                        let bmode =
                            IntraMode::from_i8(intra).ok_or(DecodeError::BitstreamCorruption)?;
                        mb.bpred[x + y * 4] = bmode;

                        self.top[mbx].bpred[x] = bmode;
                        self.left.bpred[y] = bmode;
                    }
                }
            }
            Some(mode) => {
                mb.bpred = [mode; 16];
                self.left.bpred = [mode; 4];
                self.top[mbx].bpred = [mode; 4];
            }
        }

        let chroma = self.b.read_with_tree(&KEYFRAME_UV_MODE_NODES);
        mb.chroma_mode = ChromaMode::from_i8(chroma).ok_or(DecodeError::BitstreamCorruption)?;

        Ok(mb)
    }

    /// Reads every coefficient block of a macroblock from partition `p`.
    /// Returns whether any coefficient is nonzero.
    fn read_residual_data(&mut self, mb: &MacroBlock, mbx: usize, p: usize) -> bool {
        let sindex = usize::from(mb.segmentid);
        let segment = self.segment[sindex];
        let probs = &*self.token_probs;
        let reader = &mut self.partitions[p];
        let blocks = &mut self.coeff_blocks;
        let top = &mut self.top[mbx];
        let left = &mut self.left;

        let mut plane = if mb.luma_mode == LumaMode::B {
            Plane::YCoeff0
        } else {
            Plane::Y2
        };
        let mut non_zero_dct = false;

        if plane == Plane::Y2 {
            let complexity = top.complexity[0] + left.complexity[0];
            let mut block = [0i32; 16];
            let n = read_coefficients(
                reader,
                &mut block,
                &probs[Plane::Y2 as usize],
                0,
                usize::from(complexity),
                segment.y2dc,
                segment.y2ac,
            );

            left.complexity[0] = u8::from(n);
            top.complexity[0] = u8::from(n);

            transform::iwht4x4(&mut block);

            for (k, &dc) in block.iter().enumerate() {
                blocks[16 * k] = dc;
            }

            plane = Plane::YCoeff1;
        }

        let first = if plane == Plane::YCoeff1 { 1 } else { 0 };
        for y in 0usize..4 {
            let mut left_nz = left.complexity[y + 1];
            for x in 0usize..4 {
                let i = x + y * 4;
                let block = &mut blocks[i * 16..][..16];
                let complexity = top.complexity[x + 1] + left_nz;

                let n = read_coefficients(
                    reader,
                    block,
                    &probs[plane as usize],
                    first,
                    usize::from(complexity),
                    segment.ydc,
                    segment.yac,
                );

                non_zero_dct |= block[0] != 0 || n;
                left_nz = u8::from(n);
                top.complexity[x + 1] = u8::from(n);
            }

            left.complexity[y + 1] = left_nz;
        }

        // U blocks 16-19 use complexity slots 5-6, V blocks 20-23 slots 7-8
        for (j, first_block) in [(5usize, 16usize), (7, 20)] {
            for y in 0usize..2 {
                let mut left_nz = left.complexity[y + j];
                for x in 0usize..2 {
                    let i = first_block + x + y * 2;
                    let block = &mut blocks[i * 16..][..16];
                    let complexity = top.complexity[x + j] + left_nz;

                    let n = read_coefficients(
                        reader,
                        block,
                        &probs[Plane::Chroma as usize],
                        0,
                        usize::from(complexity),
                        segment.uvdc,
                        segment.uvac,
                    );

                    non_zero_dct |= block[0] != 0 || n;
                    left_nz = u8::from(n);
                    top.complexity[x + j] = u8::from(n);
                }

                left.complexity[y + j] = left_nz;
            }
        }

        non_zero_dct
    }

    /// Inverse transforms coefficient block `i` onto the prediction at
    /// `(x0, y0)` and clears the block for the next macroblock.
    fn add_block_residue(&mut self, ws: &mut [u8], i: usize, x0: usize, y0: usize, stride: usize) {
        let coeffs = &mut self.coeff_blocks[i * 16..][..16];
        if coeffs.iter().all(|&c| c == 0) {
            return;
        }

        let mut block = [0i32; 16];
        block.copy_from_slice(coeffs);
        coeffs.fill(0);

        transform::idct4x4(&mut block);
        add_residue(ws, &block, y0, x0, stride);
    }

    fn intra_predict_luma(&mut self, mbx: usize, mby: usize, mb: &MacroBlock) {
        let stride = LUMA_STRIDE;
        let mw = usize::from(self.mbwidth);
        let mut ws = create_border_luma(mbx, mby, mw, &self.top_border_y, &self.left_border_y);

        if mb.luma_mode == LumaMode::B {
            // each subblock sees its reconstructed neighbours
            for (i, &mode) in mb.bpred.iter().enumerate() {
                let x0 = 1 + (i % 4) * 4;
                let y0 = 1 + (i / 4) * 4;
                predict_subblock(&mut ws, mode, x0, y0, stride);
                self.add_block_residue(&mut ws, i, x0, y0, stride);
            }
        } else {
            predict_luma(&mut ws, mb.luma_mode, mbx, mby);
            for i in 0usize..16 {
                let x0 = 1 + (i % 4) * 4;
                let y0 = 1 + (i / 4) * 4;
                self.add_block_residue(&mut ws, i, x0, y0, stride);
            }
        }

        update_borders(
            &ws,
            16,
            stride,
            mbx,
            &mut self.top_border_y,
            &mut self.left_border_y,
        );

        let buffer_width = self.frame.buffer_width();
        for (y, row) in ws.chunks_exact(stride).skip(1).enumerate() {
            let offset = (mby * 16 + y) * buffer_width + mbx * 16;
            self.frame.ybuf[offset..][..16].copy_from_slice(&row[1..][..16]);
        }
    }

    fn intra_predict_chroma(&mut self, mbx: usize, mby: usize, mb: &MacroBlock) {
        let stride = CHROMA_STRIDE;

        let mut uws = create_border_chroma(mbx, mby, &self.top_border_u, &self.left_border_u);
        let mut vws = create_border_chroma(mbx, mby, &self.top_border_v, &self.left_border_v);

        predict_chroma(&mut uws, mb.chroma_mode, mbx, mby);
        predict_chroma(&mut vws, mb.chroma_mode, mbx, mby);

        for i in 0usize..4 {
            let x0 = 1 + (i % 2) * 4;
            let y0 = 1 + (i / 2) * 4;
            self.add_block_residue(&mut uws, 16 + i, x0, y0, stride);
            self.add_block_residue(&mut vws, 20 + i, x0, y0, stride);
        }

        update_borders(
            &uws,
            8,
            stride,
            mbx,
            &mut self.top_border_u,
            &mut self.left_border_u,
        );
        update_borders(
            &vws,
            8,
            stride,
            mbx,
            &mut self.top_border_v,
            &mut self.left_border_v,
        );

        let chroma_width = self.frame.chroma_buffer_width();
        for (y, (urow, vrow)) in uws
            .chunks_exact(stride)
            .zip(vws.chunks_exact(stride))
            .skip(1)
            .enumerate()
        {
            let offset = (mby * 8 + y) * chroma_width + mbx * 8;
            self.frame.ubuf[offset..][..8].copy_from_slice(&urow[1..][..8]);
            self.frame.vbuf[offset..][..8].copy_from_slice(&vrow[1..][..8]);
        }
    }

    fn decode_macroblocks(&mut self) -> Result<(), DecodeError> {
        let num_partitions = self.partitions.len();

        for mby in 0..usize::from(self.mbheight) {
            if let Some(stop) = self.stop {
                stop.check()?;
            }

            let p = mby % num_partitions;
            self.left = PreviousMacroBlock::default();

            for mbx in 0..usize::from(self.mbwidth) {
                let mut mb = self.read_macroblock_header(mbx)?;

                mb.non_zero_dct = if !mb.coeffs_skipped {
                    self.read_residual_data(&mb, mbx, p)
                } else {
                    if mb.luma_mode != LumaMode::B {
                        self.left.complexity[0] = 0;
                        self.top[mbx].complexity[0] = 0;
                    }

                    for i in 1usize..9 {
                        self.left.complexity[i] = 0;
                        self.top[mbx].complexity[i] = 0;
                    }

                    false
                };

                self.b.check(())?;
                self.partitions[p].check(())?;

                self.intra_predict_luma(mbx, mby, &mb);
                self.intra_predict_chroma(mbx, mby, &mb);

                self.macroblocks.push(mb);
            }

            self.left_border_y.fill(BORDER_LEFT);
            self.left_border_u.fill(BORDER_LEFT);
            self.left_border_v.fill(BORDER_LEFT);
        }

        Ok(())
    }

    fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            simple: self.frame.filter_type,
            level: self.frame.filter_level,
            sharpness: self.frame.sharpness_level,
            segments: self.segments_enabled.then(|| {
                array::from_fn(|i| (self.segment[i].delta_values, self.segment[i].loopfilter_level))
            }),
            adjustments: self
                .loop_filter_adjustments_enabled
                .then_some((self.ref_delta, self.mode_delta)),
        }
    }

    fn loop_filter(&mut self) {
        let settings = self.filter_settings();
        let planes = Planes {
            y: &mut self.frame.ybuf,
            u: &mut self.frame.ubuf,
            v: &mut self.frame.vbuf,
            mbwidth: usize::from(self.mbwidth),
            mbheight: usize::from(self.mbheight),
        };
        filter_frame(&settings, planes, &self.macroblocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::arithmetic::ArithmeticEncoder;

    /// Builds a keyframe whose first partition is `first` and whose single
    /// coefficient partition is `tokens`.
    fn keyframe(width: u16, height: u16, first: &[u8], tokens: &[u8]) -> Vec<u8> {
        let tag = (first.len() as u32) << 5 | 1 << 4;
        let mut data = Vec::new();
        data.extend_from_slice(&tag.to_le_bytes()[..3]);
        data.extend_from_slice(&KEYFRAME_START_CODE);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(first);
        data.extend_from_slice(tokens);
        data
    }

    /// First partition of a frame with every macroblock skipped and coded
    /// with DC prediction.
    fn flat_first_partition(macroblocks: usize, filter_level: u8) -> Vec<u8> {
        let mut enc = ArithmeticEncoder::new();
        enc.write_literal(1, 0); // color space
        enc.write_literal(1, 0); // pixel type
        enc.write_flag(false); // segmentation
        enc.write_flag(false); // filter type
        enc.write_literal(6, filter_level);
        enc.write_literal(3, 0);
        enc.write_flag(false); // adjustments
        enc.write_literal(2, 0); // one partition
        enc.write_literal(7, 40);
        for _ in 0..5 {
            enc.write_optional_signed_value(4, None);
        }
        enc.write_flag(false); // refresh entropy
        for is in COEFF_UPDATE_PROBS.iter() {
            for js in is {
                for ks in js {
                    for &p in ks {
                        enc.write_bool(false, p);
                    }
                }
            }
        }
        enc.write_flag(true);
        enc.write_literal(8, 1);
        for _ in 0..macroblocks {
            enc.write_bool(true, 1);
            enc.write_with_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, DC_PRED);
            enc.write_with_tree(&KEYFRAME_UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, DC_PRED);
        }
        enc.flush_and_get_buffer()
    }

    #[test]
    fn dc_only_frame_predicts_128() {
        let first = flat_first_partition(1, 0);
        let data = keyframe(16, 16, &first, &[0, 0]);
        let frame = Vp8Decoder::decode_frame(&data).unwrap();
        assert_eq!(frame.width, 16);
        assert!(frame.for_display);
        assert!(frame.ybuf.iter().all(|&p| p == 128));
        assert!(frame.ubuf.iter().all(|&p| p == 128));
        assert!(frame.vbuf.iter().all(|&p| p == 128));
    }

    #[test]
    fn skipped_grid_continues_dc_prediction() {
        // 3x2 macroblocks, all flat, with the filter on
        let first = flat_first_partition(6, 20);
        let data = keyframe(40, 20, &first, &[0, 0]);
        let frame = Vp8Decoder::decode_frame(&data).unwrap();
        assert_eq!(frame.buffer_width(), 48);
        assert_eq!(frame.ybuf.len(), 48 * 32);
        assert!(frame.ybuf.iter().all(|&p| p == 128));
    }

    #[test]
    fn inter_frames_are_unsupported() {
        let mut data = keyframe(16, 16, &flat_first_partition(1, 0), &[]);
        data[0] |= 1;
        assert!(matches!(
            Vp8Decoder::decode_frame(&data),
            Err(DecodeError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn bad_start_code() {
        let mut data = keyframe(16, 16, &flat_first_partition(1, 0), &[]);
        data[4] ^= 0x40;
        assert!(matches!(
            Vp8Decoder::decode_frame(&data),
            Err(DecodeError::InvalidMagic([0x9d, 0x41, 0x2a]))
        ));
    }

    #[test]
    fn zero_dimension_is_corrupt() {
        let data = keyframe(0, 16, &flat_first_partition(1, 0), &[]);
        assert!(matches!(
            Vp8Decoder::decode_frame(&data),
            Err(DecodeError::BitstreamCorruption)
        ));
    }

    #[test]
    fn first_partition_past_the_end() {
        let mut data = keyframe(16, 16, &flat_first_partition(1, 0), &[]);
        data.truncate(data.len() - 1);
        assert!(matches!(
            Vp8Decoder::decode_frame(&data),
            Err(DecodeError::StreamTruncated)
        ));
        assert!(matches!(
            Vp8Decoder::decode_frame(&data[..6]),
            Err(DecodeError::StreamTruncated)
        ));
    }

    #[test]
    fn dimensions_checked_against_limits() {
        let data = keyframe(300, 16, &flat_first_partition(19, 0), &[]);
        let limits = Limits::default().with_max_dimensions(256, 256);
        assert!(matches!(
            Vp8Decoder::decode_frame_with(&data, &limits, None),
            Err(DecodeError::LimitExceeded(_))
        ));
    }

    #[test]
    fn unstoppable_token_decodes() {
        let first = flat_first_partition(1, 0);
        let data = keyframe(16, 16, &first, &[0, 0]);
        let stop = enough::Unstoppable;
        assert!(Vp8Decoder::decode_frame_with(&data, &Limits::none(), Some(&stop)).is_ok());
    }

    #[test]
    fn coefficient_tokens_dequantize_in_raster_order() {
        // DC token 1 then a 2 at zigzag position 1, then end of block
        let probs = &COEFF_PROBS[Plane::YCoeff0 as usize];
        let mut enc = ArithmeticEncoder::new();
        let p = &probs[0][0];
        enc.write_bool(true, p[0]);
        enc.write_bool(true, p[1]);
        enc.write_bool(false, p[2]); // one
        enc.write_flag(true); // negative
        let p = &probs[1][1];
        enc.write_bool(true, p[0]);
        enc.write_bool(true, p[1]);
        enc.write_bool(true, p[2]);
        enc.write_bool(false, p[3]);
        enc.write_bool(false, p[4]); // two
        enc.write_flag(false);
        let p = &probs[2][2];
        enc.write_bool(false, p[0]);
        let buf = enc.flush_and_get_buffer();

        let mut reader = BoolReader::new(&buf);
        let mut out = [0i32; 16];
        let nonzero = read_coefficients(&mut reader, &mut out, probs, 0, 0, 10, 20);
        assert!(nonzero);
        assert_eq!(out[0], -10);
        assert_eq!(out[1], 40);
        assert!(out[2..].iter().all(|&c| c == 0));
    }
}
