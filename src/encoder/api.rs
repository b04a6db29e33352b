//! Encoding of lossy WebP images.
//!
//! # API
//!
//! ```rust
//! use zenvp8::{EncodeRequest, EncoderConfig, PixelLayout};
//!
//! let config = EncoderConfig::new().with_quality(85);
//!
//! let rgba_data = vec![255u8; 4 * 4 * 4]; // 4x4 RGBA image
//! let webp = EncodeRequest::new(&config, &rgba_data, PixelLayout::Rgba8, 4, 4)
//!     .encode()?;
//! # Ok::<(), zenvp8::EncodeError>(())
//! ```
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use log::debug;
use thiserror::Error;

use super::vec_writer::VecWriter;
use super::vp8::{encode_frame, FrameParams};
use crate::common::types::AC_QUANT;
use crate::decoder::vp8::Frame;
use crate::decoder::yuv::{convert_image_yuv, import_yuv420, YuvImage};
use crate::decoder::{Limits, WebPRiffChunk};

/// Largest width or height the 14-bit frame header fields can carry.
pub const MAX_DIMENSION: u32 = (1 << 14) - 1;

/// Error that can occur during encoding.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// An IO error occurred.
    #[cfg(feature = "std")]
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The image dimensions are not allowed by the VP8 format.
    #[error("Invalid dimensions")]
    InvalidDimensions,

    /// The quality is above 100.
    #[error("Invalid quality: {0}")]
    InvalidQuality(u8),

    /// The input buffer does not match the pixel layout and dimensions.
    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(String),

    /// A configuration value is out of range, or a limit was exceeded.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Encoding was cancelled via a [`enough::Stop`] token.
    #[error("Encoding cancelled: {0}")]
    Cancelled(enough::StopReason),
}

impl From<enough::StopReason> for EncodeError {
    fn from(reason: enough::StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// Layout of the pixels handed to the encoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// Red, green and blue byte per pixel.
    Rgb8,
    /// Red, green, blue and alpha byte per pixel. Alpha is dropped.
    Rgba8,
    /// YUV 4:2:0 planar data packed as \[Y, U, V\], chroma planes
    /// `ceil(width / 2) x ceil(height / 2)`.
    Yuv420,
}

impl PixelLayout {
    /// Bytes an image of this layout takes.
    #[must_use]
    pub fn buffer_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelLayout::Rgb8 => w * h * 3,
            PixelLayout::Rgba8 => w * h * 4,
            PixelLayout::Yuv420 => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelLayout::Rgb8 => f.write_str("RGB8"),
            PixelLayout::Rgba8 => f.write_str("RGBA8"),
            PixelLayout::Yuv420 => f.write_str("YUV 4:2:0"),
        }
    }
}

/// Statistics from an encoding operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeStats {
    /// Size of the VP8 payload in bytes.
    pub coded_size: u32,
    /// PSNR values: \[Y, U, V, All\] in dB, over the macroblock-aligned
    /// planes before loop filtering. 99 for an exact reconstruction.
    pub psnr: [f32; 4],
    /// Quantizer index used for every macroblock.
    pub quant_index: u8,
    /// Loop filter level written to the frame header.
    pub filter_level: u8,
    /// Number of macroblocks.
    pub block_count: u32,
    /// Number of macroblocks with all-zero coefficients (skipped).
    pub block_count_skip: u32,
    /// Macroblocks per luma mode, in `DC, V, H, TM` order.
    pub luma_mode_counts: [u32; 4],
    /// Size of the first partition (frame and macroblock headers) in bytes.
    pub header_bytes: u32,
    /// Size of each coefficient partition in bytes.
    pub partition_bytes: Vec<u32>,
}

/// A raw VP8 keyframe with the encoder's own view of it.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// The VP8 payload, without a RIFF container.
    pub data: Vec<u8>,
    /// The loop-filtered reconstruction; decoding `data` yields this frame.
    pub reconstruction: Frame,
    /// Encoding statistics.
    pub stats: EncodeStats,
}

/// Encoder configuration. Dimension-independent, reusable across images.
///
/// ```rust
/// use zenvp8::{EncoderConfig, EncodeRequest, PixelLayout};
///
/// let config = EncoderConfig::new()
///     .with_quality(90)
///     .with_filter_strength(40)
///     .with_partitions(2);
///
/// // Reuse config for multiple images
/// let image1 = vec![0u8; 4 * 4 * 3]; // 4x4 RGB
/// let image2 = vec![0u8; 8 * 6 * 3]; // 8x6 RGB
/// let webp1 = EncodeRequest::new(&config, &image1, PixelLayout::Rgb8, 4, 4).encode()?;
/// let webp2 = EncodeRequest::new(&config, &image2, PixelLayout::Rgb8, 8, 6).encode()?;
/// # Ok::<(), zenvp8::EncodeError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct EncoderConfig {
    /// Encoding quality (0 = smallest, 100 = best). Default: 75.
    pub quality: u8,
    /// Loop filter strength (0 = off, 100 = strongest). Default: 60.
    pub filter_strength: u8,
    /// Loop filter sharpness (0-7). Default: 0.
    pub sharpness: u8,
    /// Use the simple loop filter instead of the normal one. Default: `false`.
    pub simple_filter: bool,
    /// Number of coefficient partitions (1, 2, 4 or 8). Default: 1.
    pub partitions: u8,
    /// Limits on dimensions and memory. Default: none.
    pub limits: Limits,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 75,
            filter_strength: 60,
            sharpness: 0,
            simple_filter: false,
            partitions: 1,
            limits: Limits::none(),
        }
    }
}

impl EncoderConfig {
    /// Create a new encoder configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoding quality (0-100).
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Set the loop filter strength (0-100).
    #[must_use]
    pub fn with_filter_strength(mut self, strength: u8) -> Self {
        self.filter_strength = strength;
        self
    }

    /// Set the loop filter sharpness (0-7).
    #[must_use]
    pub fn with_sharpness(mut self, sharpness: u8) -> Self {
        self.sharpness = sharpness;
        self
    }

    /// Select the simple loop filter.
    #[must_use]
    pub fn with_simple_filter(mut self, simple: bool) -> Self {
        self.simple_filter = simple;
        self
    }

    /// Set the number of coefficient partitions (1, 2, 4 or 8).
    #[must_use]
    pub fn with_partitions(mut self, partitions: u8) -> Self {
        self.partitions = partitions;
        self
    }

    /// Set the encode limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Quantizer index for the configured quality: 0 at quality 100, 127 at
    /// quality 0.
    #[must_use]
    pub fn quant_index(&self) -> u8 {
        let quality = u32::from(self.quality.min(100));
        (127 - quality * 127 / 100) as u8
    }

    /// Loop filter level for the configured strength at `quant_index`.
    ///
    /// The level grows with the quantizer step, so coarser quantization is
    /// filtered harder.
    #[must_use]
    pub fn filter_level(&self, quant_index: u8) -> u8 {
        let step = AC_QUANT[usize::from(quant_index.min(127))] as u32;
        let strength = u32::from(self.filter_strength.min(100));
        (strength * step / 200).min(63) as u8
    }

    fn validate(&self) -> Result<(), EncodeError> {
        if self.quality > 100 {
            return Err(EncodeError::InvalidQuality(self.quality));
        }
        if self.filter_strength > 100 {
            return Err(EncodeError::InvalidParameter(format!(
                "filter strength {} is above 100",
                self.filter_strength
            )));
        }
        if self.sharpness > 7 {
            return Err(EncodeError::InvalidParameter(format!(
                "sharpness {} is above 7",
                self.sharpness
            )));
        }
        if !matches!(self.partitions, 1 | 2 | 4 | 8) {
            return Err(EncodeError::InvalidParameter(format!(
                "{} partitions, expected 1, 2, 4 or 8",
                self.partitions
            )));
        }
        Ok(())
    }

    fn frame_params(&self) -> FrameParams {
        let quant_index = self.quant_index();
        FrameParams {
            quant_index,
            filter_level: self.filter_level(quant_index),
            sharpness: self.sharpness,
            simple_filter: self.simple_filter,
            num_partitions: usize::from(self.partitions),
        }
    }
}

/// A single encode operation: configuration, pixels and an optional
/// cancellation token.
///
/// ```rust
/// use zenvp8::{EncodeRequest, EncoderConfig, PixelLayout};
///
/// let config = EncoderConfig::new().with_quality(60);
/// let rgb = vec![90u8; 64 * 48 * 3];
/// let (webp, stats) = EncodeRequest::new(&config, &rgb, PixelLayout::Rgb8, 64, 48)
///     .encode_with_stats()?;
/// assert_eq!(stats.block_count, 4 * 3);
/// # Ok::<(), zenvp8::EncodeError>(())
/// ```
pub struct EncodeRequest<'a> {
    config: &'a EncoderConfig,
    pixels: &'a [u8],
    layout: PixelLayout,
    width: u32,
    height: u32,
    stop: Option<&'a dyn enough::Stop>,
}

impl<'a> EncodeRequest<'a> {
    /// Create an encoding request.
    #[must_use]
    pub fn new(
        config: &'a EncoderConfig,
        pixels: &'a [u8],
        layout: PixelLayout,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            config,
            pixels,
            layout,
            width,
            height,
            stop: None,
        }
    }

    /// Set a cooperative cancellation token, checked once per macroblock row.
    #[must_use]
    pub fn with_stop(mut self, stop: &'a dyn enough::Stop) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Encode to WebP bytes.
    pub fn encode(self) -> Result<Vec<u8>, EncodeError> {
        let (output, _stats) = self.encode_with_stats()?;
        Ok(output)
    }

    /// Encode to WebP bytes and return encoding statistics.
    pub fn encode_with_stats(self) -> Result<(Vec<u8>, EncodeStats), EncodeError> {
        let frame = self.encode_frame()?;
        let mut output = Vec::with_capacity(frame.data.len() + 20);
        write_webp(&mut output, &frame.data);
        Ok((output, frame.stats))
    }

    /// Encode to WebP, writing to an [`io::Write`](std::io::Write) implementor.
    #[cfg(feature = "std")]
    pub fn encode_to<W: std::io::Write>(self, mut writer: W) -> Result<(), EncodeError> {
        let encoded = self.encode()?;
        writer.write_all(&encoded)?;
        Ok(())
    }

    /// Encode a bare VP8 keyframe together with its reconstruction.
    pub fn encode_frame(self) -> Result<EncodedFrame, EncodeError> {
        self.config.validate()?;
        self.validate_input()?;

        let (width, height) = (self.width as usize, self.height as usize);
        let mbwidth = width.div_ceil(16);
        let mbheight = height.div_ceil(16);
        // source planes plus the reconstruction, 1.5 bytes per pixel each
        let planes = (mbwidth * 16 * mbheight * 16 * 3 / 2 * 2) as u64;
        self.config
            .limits
            .check_memory(planes)
            .map_err(|e| EncodeError::InvalidParameter(format!("{e}")))?;

        let source = self.source_planes();
        let params = self.config.frame_params();
        debug!(
            "encoding {}x{} {} at quality {} (q {}, filter level {})",
            self.width,
            self.height,
            self.layout,
            self.config.quality,
            params.quant_index,
            params.filter_level
        );

        encode_frame(
            &source,
            self.width as u16,
            self.height as u16,
            params,
            self.stop,
        )
    }

    fn validate_input(&self) -> Result<(), EncodeError> {
        if !(1..=MAX_DIMENSION).contains(&self.width) || !(1..=MAX_DIMENSION).contains(&self.height)
        {
            return Err(EncodeError::InvalidDimensions);
        }
        self.config
            .limits
            .check_dimensions(self.width, self.height)
            .map_err(|e| EncodeError::InvalidParameter(format!("{e}")))?;

        let expected = self.layout.buffer_size(self.width, self.height);
        if self.pixels.len() != expected {
            return Err(EncodeError::InvalidBufferSize(format!(
                "{} bytes for a {}x{} {} image, expected {}",
                self.pixels.len(),
                self.width,
                self.height,
                self.layout,
                expected
            )));
        }
        Ok(())
    }

    fn source_planes(&self) -> YuvImage {
        let (width, height) = (self.width as usize, self.height as usize);
        match self.layout {
            PixelLayout::Rgb8 => convert_image_yuv::<3>(self.pixels, width, height),
            PixelLayout::Rgba8 => convert_image_yuv::<4>(self.pixels, width, height),
            PixelLayout::Yuv420 => import_yuv420(self.pixels, width, height),
        }
    }
}

/// Encode RGBA pixels to a lossy WebP file.
pub fn encode_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    config: &EncoderConfig,
) -> Result<Vec<u8>, EncodeError> {
    EncodeRequest::new(config, data, PixelLayout::Rgba8, width, height).encode()
}

/// Encode RGB pixels to a lossy WebP file.
pub fn encode_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    config: &EncoderConfig,
) -> Result<Vec<u8>, EncodeError> {
    EncodeRequest::new(config, data, PixelLayout::Rgb8, width, height).encode()
}

/// Size of a chunk with `inner_bytes` of payload, including its header and
/// padding.
pub(crate) const fn chunk_size(inner_bytes: usize) -> u32 {
    if inner_bytes % 2 == 1 {
        (inner_bytes + 1) as u32 + 8
    } else {
        inner_bytes as u32 + 8
    }
}

pub(crate) fn write_chunk(w: &mut Vec<u8>, chunk: WebPRiffChunk, data: &[u8]) {
    w.write_all(&chunk.to_fourcc());
    w.write_u32_le(data.len() as u32);
    w.write_all(data);
    if data.len() % 2 == 1 {
        w.push(0);
    }
}

/// Wraps a VP8 payload in the simple lossy layout: `RIFF`, size, `WEBP`,
/// then one `VP8 ` chunk.
fn write_webp(w: &mut Vec<u8>, vp8: &[u8]) {
    w.write_all(&WebPRiffChunk::RIFF.to_fourcc());
    w.write_u32_le(chunk_size(vp8.len()) + 4);
    w.write_all(&WebPRiffChunk::WEBP.to_fourcc());
    write_chunk(w, WebPRiffChunk::VP8, vp8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn quality_maps_to_quantizer() {
        let q = |quality| EncoderConfig::new().with_quality(quality).quant_index();
        assert_eq!(q(100), 0);
        assert_eq!(q(0), 127);
        assert_eq!(q(75), 32);
        assert_eq!(q(50), 64);
    }

    #[test]
    fn filter_level_follows_strength() {
        let config = EncoderConfig::new();
        assert_eq!(config.clone().with_filter_strength(0).filter_level(100), 0);
        assert!(config.filter_level(100) > config.filter_level(10));
        assert!(config.with_filter_strength(100).filter_level(127) <= 63);
    }

    #[test]
    fn chunk_sizes_are_padded() {
        assert_eq!(chunk_size(0), 8);
        assert_eq!(chunk_size(3), 12);
        assert_eq!(chunk_size(4), 12);

        let mut out = Vec::new();
        write_webp(&mut out, &[1, 2, 3]);
        assert_eq!(&out[..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([out[4], out[5], out[6], out[7]]), 16);
        assert_eq!(&out[8..16], b"WEBPVP8 ");
        assert_eq!(&out[16..20], &[3, 0, 0, 0]);
        assert_eq!(&out[20..], &[1, 2, 3, 0]);
        assert_eq!(out.len(), 8 + 16);
    }

    #[test]
    fn rejects_bad_dimensions() {
        let config = EncoderConfig::new();
        let pixels = vec![0u8; 3];
        for (w, h) in [(0, 1), (1, 0), (MAX_DIMENSION + 1, 1)] {
            let result = EncodeRequest::new(&config, &pixels, PixelLayout::Rgb8, w, h).encode();
            assert!(matches!(result, Err(EncodeError::InvalidDimensions)), "{w}x{h}");
        }
    }

    #[test]
    fn rejects_bad_quality_and_parameters() {
        let pixels = vec![0u8; 16 * 16 * 3];
        let encode = |config: EncoderConfig| {
            EncodeRequest::new(&config, &pixels, PixelLayout::Rgb8, 16, 16).encode()
        };
        assert!(matches!(
            encode(EncoderConfig::new().with_quality(101)),
            Err(EncodeError::InvalidQuality(101))
        ));
        assert!(matches!(
            encode(EncoderConfig::new().with_partitions(3)),
            Err(EncodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            encode(EncoderConfig::new().with_sharpness(8)),
            Err(EncodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            encode(EncoderConfig::new().with_limits(Limits::none().with_max_dimensions(8, 8))),
            Err(EncodeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        let config = EncoderConfig::new();
        let pixels = vec![0u8; 5 * 3 * 4 - 1];
        let result = EncodeRequest::new(&config, &pixels, PixelLayout::Rgba8, 5, 3).encode();
        assert!(matches!(result, Err(EncodeError::InvalidBufferSize(_))));

        // odd sizes round the chroma planes up
        assert_eq!(PixelLayout::Yuv420.buffer_size(5, 3), 15 + 2 * 3 * 2);
    }

    struct AlwaysCancelled;

    impl enough::Stop for AlwaysCancelled {
        fn check(&self) -> Result<(), enough::StopReason> {
            Err(enough::StopReason::Cancelled)
        }
    }

    #[test]
    fn cancelled_before_first_row() {
        let config = EncoderConfig::new();
        let pixels = vec![0u8; 32 * 32 * 3];
        let stop = AlwaysCancelled;
        let result = EncodeRequest::new(&config, &pixels, PixelLayout::Rgb8, 32, 32)
            .with_stop(&stop)
            .encode();
        assert!(matches!(result, Err(EncodeError::Cancelled(_))));
    }
}
