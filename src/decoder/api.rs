//! Decoding entry points: error type, configuration and the WebP RIFF
//! container around a lossy `VP8 ` chunk.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::{trace, warn};
use thiserror::Error;

use super::limits::Limits;
use super::vp8::{Frame, FrameTag, Vp8Decoder};
use crate::slice_reader::SliceReader;

/// Errors that can occur when attempting to decode a VP8 frame or a lossy
/// WebP file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The data ended before a structure that must be complete: the
    /// container, the frame header, the first partition or a coefficient
    /// partition.
    #[error("Stream truncated")]
    StreamTruncated,

    /// VP8's `[0x9D, 0x01, 0x2A]` magic not found or invalid
    #[error("Invalid VP8 magic: {0:x?}")]
    InvalidMagic([u8; 3]),

    /// The file may be valid, but this crate doesn't support decoding it.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The bitstream was somehow corrupt
    #[error("Corrupt bitstream")]
    BitstreamCorruption,

    /// RIFF's "RIFF" signature not found or invalid
    #[error("Invalid RIFF signature: {0:x?}")]
    RiffSignatureInvalid([u8; 4]),

    /// WebP's "WEBP" signature not found or invalid
    #[error("Invalid WebP signature: {0:x?}")]
    WebpSignatureInvalid([u8; 4]),

    /// An expected chunk was missing
    #[error("An expected chunk was missing")]
    ChunkMissing,

    /// The VP8X canvas and the VP8 frame disagree on the image size
    #[error("Inconsistent image sizes")]
    InconsistentImageSizes,

    /// A configured [`Limits`] value was exceeded
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Decoding was cancelled via a [`enough::Stop`] token.
    #[error("Decoding cancelled: {0}")]
    Cancelled(enough::StopReason),
}

impl From<enough::StopReason> for DecodeError {
    fn from(reason: enough::StopReason) -> Self {
        Self::Cancelled(reason)
    }
}

/// All possible RIFF chunks in a WebP image file
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WebPRiffChunk {
    RIFF,
    WEBP,
    VP8,
    VP8L,
    VP8X,
    ANIM,
    ANMF,
    ALPH,
    ICCP,
    EXIF,
    XMP,
    Unknown([u8; 4]),
}

impl WebPRiffChunk {
    pub(crate) const fn from_fourcc(chunk_fourcc: [u8; 4]) -> Self {
        match &chunk_fourcc {
            b"RIFF" => Self::RIFF,
            b"WEBP" => Self::WEBP,
            b"VP8 " => Self::VP8,
            b"VP8L" => Self::VP8L,
            b"VP8X" => Self::VP8X,
            b"ANIM" => Self::ANIM,
            b"ANMF" => Self::ANMF,
            b"ALPH" => Self::ALPH,
            b"ICCP" => Self::ICCP,
            b"EXIF" => Self::EXIF,
            b"XMP " => Self::XMP,
            _ => Self::Unknown(chunk_fourcc),
        }
    }

    pub(crate) const fn to_fourcc(self) -> [u8; 4] {
        match self {
            Self::RIFF => *b"RIFF",
            Self::WEBP => *b"WEBP",
            Self::VP8 => *b"VP8 ",
            Self::VP8L => *b"VP8L",
            Self::VP8X => *b"VP8X",
            Self::ANIM => *b"ANIM",
            Self::ANMF => *b"ANMF",
            Self::ALPH => *b"ALPH",
            Self::ICCP => *b"ICCP",
            Self::EXIF => *b"EXIF",
            Self::XMP => *b"XMP ",
            Self::Unknown(fourcc) => fourcc,
        }
    }
}

fn read_fourcc(r: &mut SliceReader) -> Result<WebPRiffChunk, DecodeError> {
    let mut chunk_fourcc = [0; 4];
    r.read_exact(&mut chunk_fourcc)?;
    Ok(WebPRiffChunk::from_fourcc(chunk_fourcc))
}

/// Returns the chunk, its payload size and the size including the pad byte.
fn read_chunk_header(r: &mut SliceReader) -> Result<(WebPRiffChunk, usize, usize), DecodeError> {
    let chunk = read_fourcc(r)?;
    let chunk_size = r.read_u32_le()?;
    let chunk_size_rounded = chunk_size.saturating_add(chunk_size & 1);
    Ok((chunk, chunk_size as usize, chunk_size_rounded as usize))
}

// VP8X flag bits
const ANIMATION_FLAG: u8 = 0x02;
const ALPHA_FLAG: u8 = 0x10;

/// The lossy payload of a WebP file and what the container says about it.
#[derive(Debug)]
struct Container<'a> {
    vp8: &'a [u8],
    /// Canvas size of an extended file.
    canvas: Option<(u32, u32)>,
    has_alpha: bool,
}

impl<'a> Container<'a> {
    fn parse(data: &'a [u8], limits: &Limits) -> Result<Self, DecodeError> {
        limits.check_file_size(data.len() as u64)?;

        let mut r = SliceReader::new(data);
        let (WebPRiffChunk::RIFF, riff_size, _) = read_chunk_header(&mut r)? else {
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(data.get(..4).ok_or(DecodeError::StreamTruncated)?);
            return Err(DecodeError::RiffSignatureInvalid(fourcc));
        };

        match read_fourcc(&mut r)? {
            WebPRiffChunk::WEBP => {}
            fourcc => return Err(DecodeError::WebpSignatureInvalid(fourcc.to_fourcc())),
        }

        let (chunk, chunk_size, chunk_size_rounded) = read_chunk_header(&mut r)?;
        match chunk {
            WebPRiffChunk::VP8 => Ok(Self {
                vp8: r.take_slice(chunk_size)?,
                canvas: None,
                has_alpha: false,
            }),
            WebPRiffChunk::VP8L => Err(DecodeError::UnsupportedFeature(
                "lossless (VP8L) images".into(),
            )),
            WebPRiffChunk::VP8X => {
                let mut header = SliceReader::new(r.take_slice(chunk_size)?);
                let flags = header.read_u8()?;
                header.skip(3)?;
                let canvas_width = header.read_u24_le()? + 1;
                let canvas_height = header.read_u24_le()? + 1;
                if chunk_size_rounded > chunk_size {
                    r.skip(1)?;
                }

                if flags & ANIMATION_FLAG != 0 {
                    return Err(DecodeError::UnsupportedFeature("animated images".into()));
                }

                // chunks after VP8X end with the RIFF payload, or the data if that is shorter
                let end = (riff_size + 8).min(data.len());
                let vp8 = Self::find_vp8(&mut r, end)?;

                Ok(Self {
                    vp8,
                    canvas: Some((canvas_width, canvas_height)),
                    has_alpha: flags & ALPHA_FLAG != 0,
                })
            }
            _ => Err(DecodeError::ChunkMissing),
        }
    }

    /// Walks the chunks of an extended file up to the `VP8 ` chunk.
    fn find_vp8(r: &mut SliceReader<'a>, end: usize) -> Result<&'a [u8], DecodeError> {
        while r.position() + 8 <= end {
            let (chunk, chunk_size, chunk_size_rounded) = read_chunk_header(r)?;
            match chunk {
                WebPRiffChunk::VP8 => return r.take_slice(chunk_size),
                WebPRiffChunk::VP8L => {
                    return Err(DecodeError::UnsupportedFeature(
                        "lossless (VP8L) images".into(),
                    ))
                }
                WebPRiffChunk::ANIM | WebPRiffChunk::ANMF => {
                    return Err(DecodeError::UnsupportedFeature("animated images".into()))
                }
                WebPRiffChunk::ALPH => {
                    warn!("skipping ALPH chunk of {chunk_size} bytes, alpha is not decoded");
                }
                other => {
                    trace!(
                        "skipping {:?} chunk of {chunk_size} bytes",
                        core::str::from_utf8(&other.to_fourcc()).unwrap_or("????")
                    );
                }
            }
            r.skip(chunk_size_rounded)?;
        }

        Err(DecodeError::ChunkMissing)
    }
}

/// Methods for upsampling the chroma values in lossy decoding
///
/// The chroma red and blue planes are encoded in VP8 as half the size of the luma plane
/// Therefore we need to upsample these values up to fit each pixel in the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpsamplingMethod {
    /// Fancy upsampling
    ///
    /// Does bilinear interpolation using the 4 values nearest to the pixel, weighting based on the distance
    /// from the pixel.
    #[default]
    Bilinear,
    /// Simple upsampling, just uses the closest u/v value to the pixel when upsampling
    ///
    /// Matches the -nofancy option in dwebp.
    /// Should be faster but may lead to slightly jagged edges.
    Simple,
}

/// Decoder configuration, reusable across requests.
///
/// ```rust
/// use zenvp8::{DecodeConfig, Limits, UpsamplingMethod};
///
/// let config = DecodeConfig::default()
///     .with_upsampling(UpsamplingMethod::Simple)
///     .with_limits(Limits::default().with_max_dimensions(4096, 4096));
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct DecodeConfig {
    /// Chroma upsampling used for RGB(A) output.
    pub upsampling: UpsamplingMethod,
    /// Resource limits checked before any allocation.
    pub limits: Limits,
}

impl DecodeConfig {
    /// Default configuration: fancy upsampling and [`Limits::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chroma upsampling method.
    #[must_use]
    pub fn with_upsampling(mut self, upsampling: UpsamplingMethod) -> Self {
        self.upsampling = upsampling;
        self
    }

    /// Use nearest-sample chroma upsampling, like `dwebp -nofancy`.
    #[must_use]
    pub fn no_fancy_upsampling(self) -> Self {
        self.with_upsampling(UpsamplingMethod::Simple)
    }

    /// Set the resource limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

/// A single decode operation: configuration, input and an optional
/// cancellation token.
///
/// ```rust,no_run
/// use zenvp8::{DecodeConfig, DecodeRequest};
///
/// let config = DecodeConfig::default();
/// let webp_data: &[u8] = &[]; // your WebP data
/// let (pixels, width, height) = DecodeRequest::new(&config, webp_data).decode_rgba()?;
/// # Ok::<(), zenvp8::DecodeError>(())
/// ```
pub struct DecodeRequest<'a> {
    config: &'a DecodeConfig,
    data: &'a [u8],
    stop: Option<&'a dyn enough::Stop>,
}

impl<'a> DecodeRequest<'a> {
    /// Create a new decoding request.
    #[must_use]
    pub fn new(config: &'a DecodeConfig, data: &'a [u8]) -> Self {
        Self {
            config,
            data,
            stop: None,
        }
    }

    /// Set a cooperative cancellation token, checked once per macroblock row.
    #[must_use]
    pub fn with_stop(mut self, stop: &'a dyn enough::Stop) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Decodes the VP8 frame with its macroblock-aligned planes.
    pub fn decode_frame(self) -> Result<Frame, DecodeError> {
        let container = Container::parse(self.data, &self.config.limits)?;

        if let Some(canvas) = container.canvas {
            let tag = FrameTag::parse(container.vp8)?;
            if canvas != (u32::from(tag.width), u32::from(tag.height)) {
                return Err(DecodeError::InconsistentImageSizes);
            }
        }

        Vp8Decoder::decode_frame_with(container.vp8, &self.config.limits, self.stop)
    }

    /// Decode to RGBA pixels. Alpha is always 255.
    pub fn decode_rgba(self) -> Result<(Vec<u8>, u32, u32), DecodeError> {
        let upsampling = self.config.upsampling;
        let limits = self.config.limits.clone();
        let frame = self.decode_frame()?;
        let mut buf = output_buffer(&frame, 4, &limits)?;
        frame.fill_rgba(&mut buf, upsampling);
        Ok((buf, u32::from(frame.width), u32::from(frame.height)))
    }

    /// Decode to RGB pixels.
    pub fn decode_rgb(self) -> Result<(Vec<u8>, u32, u32), DecodeError> {
        let upsampling = self.config.upsampling;
        let limits = self.config.limits.clone();
        let frame = self.decode_frame()?;
        let mut buf = output_buffer(&frame, 3, &limits)?;
        frame.fill_rgb(&mut buf, upsampling);
        Ok((buf, u32::from(frame.width), u32::from(frame.height)))
    }

    /// Decode to YUV 4:2:0 planes cropped to the image size.
    pub fn decode_yuv420(self) -> Result<YuvPlanes, DecodeError> {
        let frame = self.decode_frame()?;
        Ok(YuvPlanes::from_frame(&frame))
    }

    /// Read image info without decoding pixel data.
    pub fn info(self) -> Result<ImageInfo, DecodeError> {
        ImageInfo::parse(self.data, &self.config.limits)
    }
}

fn output_buffer(frame: &Frame, bpp: usize, limits: &Limits) -> Result<Vec<u8>, DecodeError> {
    let size = usize::from(frame.width) * usize::from(frame.height) * bpp;
    limits.check_memory(size as u64)?;
    Ok(vec![0u8; size])
}

/// Decoded YUV 4:2:0 planes, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvPlanes {
    /// Luma plane (full resolution).
    pub y: Vec<u8>,
    /// Chroma blue plane (half resolution in each dimension).
    pub u: Vec<u8>,
    /// Chroma red plane (half resolution in each dimension).
    pub v: Vec<u8>,
    /// Width of the luma plane in pixels.
    pub y_width: u32,
    /// Height of the luma plane in pixels.
    pub y_height: u32,
    /// Width of each chroma plane in pixels.
    pub uv_width: u32,
    /// Height of each chroma plane in pixels.
    pub uv_height: u32,
}

impl YuvPlanes {
    /// Crops the macroblock-aligned planes of `frame` to its visible area.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        fn crop(plane: &[u8], stride: usize, width: usize, height: usize) -> Vec<u8> {
            let mut out = Vec::with_capacity(width * height);
            for row in plane.chunks_exact(stride).take(height) {
                out.extend_from_slice(&row[..width]);
            }
            out
        }

        let w = usize::from(frame.width);
        let h = usize::from(frame.height);
        let uv_w = usize::from(frame.chroma_width());
        let uv_h = usize::from(frame.chroma_height());

        Self {
            y: crop(&frame.ybuf, frame.buffer_width(), w, h),
            u: crop(&frame.ubuf, frame.chroma_buffer_width(), uv_w, uv_h),
            v: crop(&frame.vbuf, frame.chroma_buffer_width(), uv_w, uv_h),
            y_width: w as u32,
            y_height: h as u32,
            uv_width: uv_w as u32,
            uv_height: uv_h as u32,
        }
    }
}

/// Image information read from the container and frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct ImageInfo {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Whether the file declares alpha. Alpha is never decoded.
    pub has_alpha: bool,
    /// Whether the file uses the extended (`VP8X`) layout.
    pub is_extended: bool,
    /// VP8 bitstream version (0-3).
    pub version: u8,
}

impl ImageInfo {
    /// Parse image information from WebP data.
    pub fn from_webp(data: &[u8]) -> Result<Self, DecodeError> {
        Self::parse(data, &Limits::default())
    }

    fn parse(data: &[u8], limits: &Limits) -> Result<Self, DecodeError> {
        let container = Container::parse(data, limits)?;
        let tag = FrameTag::parse(container.vp8)?;
        let (width, height) = (u32::from(tag.width), u32::from(tag.height));

        if let Some(canvas) = container.canvas {
            if canvas != (width, height) {
                return Err(DecodeError::InconsistentImageSizes);
            }
        }

        Ok(Self {
            width,
            height,
            has_alpha: container.has_alpha,
            is_extended: container.canvas.is_some(),
            version: tag.version,
        })
    }
}

/// Decode WebP data to RGBA pixels.
///
/// Returns the decoded pixels and dimensions.
///
/// # Example
///
/// ```rust,no_run
/// let webp_data: &[u8] = &[]; // your WebP data
/// let (pixels, width, height) = zenvp8::decode_rgba(webp_data)?;
/// # Ok::<(), zenvp8::DecodeError>(())
/// ```
pub fn decode_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    DecodeRequest::new(&DecodeConfig::default(), data).decode_rgba()
}

/// Decode WebP data to RGB pixels.
///
/// Returns the decoded pixels and dimensions.
///
/// # Example
///
/// ```rust,no_run
/// let webp_data: &[u8] = &[]; // your WebP data
/// let (pixels, width, height) = zenvp8::decode_rgb(webp_data)?;
/// # Ok::<(), zenvp8::DecodeError>(())
/// ```
pub fn decode_rgb(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    DecodeRequest::new(&DecodeConfig::default(), data).decode_rgb()
}

/// Decode WebP data to YUV 4:2:0 planes.
///
/// # Returns
/// [`YuvPlanes`] containing separate Y, U, and V buffers.
pub fn decode_yuv420(data: &[u8]) -> Result<YuvPlanes, DecodeError> {
    DecodeRequest::new(&DecodeConfig::default(), data).decode_yuv420()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(fourcc);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(b"WEBP");
        out.extend_from_slice(&body);
        out
    }

    fn vp8x(flags: u8, width: u32, height: u32) -> Vec<u8> {
        let mut payload = vec![flags, 0, 0, 0];
        payload.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
        payload.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
        chunk(b"VP8X", &payload)
    }

    // only the ten byte uncompressed header, enough for the container checks
    fn vp8_header(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0x10, 0x00, 0x00, 0x9d, 0x01, 0x2a];
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data
    }

    #[test]
    fn fourcc_round_trip() {
        for fourcc in [*b"VP8 ", *b"VP8X", *b"ALPH", *b"XMP ", *b"abcd"] {
            assert_eq!(WebPRiffChunk::from_fourcc(fourcc).to_fourcc(), fourcc);
        }
        assert_eq!(WebPRiffChunk::from_fourcc(*b"VP8 "), WebPRiffChunk::VP8);
    }

    #[test]
    fn simple_layout_info() {
        let data = riff(&[chunk(b"VP8 ", &vp8_header(33, 17))]);
        let info = ImageInfo::from_webp(&data).unwrap();
        assert_eq!((info.width, info.height), (33, 17));
        assert!(!info.is_extended);
        assert!(!info.has_alpha);
    }

    #[test]
    fn extended_layout_skips_alpha_and_metadata() {
        let data = riff(&[
            vp8x(ALPHA_FLAG, 33, 17),
            chunk(b"ICCP", &[1, 2, 3]),
            chunk(b"ALPH", &[0; 5]),
            chunk(b"VP8 ", &vp8_header(33, 17)),
            chunk(b"EXIF", &[9; 4]),
        ]);
        let info = ImageInfo::from_webp(&data).unwrap();
        assert_eq!((info.width, info.height), (33, 17));
        assert!(info.is_extended);
        assert!(info.has_alpha);
    }

    #[test]
    fn canvas_must_match_frame() {
        let data = riff(&[vp8x(0, 32, 17), chunk(b"VP8 ", &vp8_header(33, 17))]);
        assert!(matches!(
            ImageInfo::from_webp(&data),
            Err(DecodeError::InconsistentImageSizes)
        ));
        assert!(matches!(
            decode_rgba(&data),
            Err(DecodeError::InconsistentImageSizes)
        ));
    }

    #[test]
    fn lossless_and_animation_are_unsupported() {
        let lossless = riff(&[chunk(b"VP8L", &[0x2f, 0, 0, 0, 0])]);
        assert!(matches!(
            decode_rgba(&lossless),
            Err(DecodeError::UnsupportedFeature(_))
        ));

        let animated = riff(&[vp8x(ANIMATION_FLAG, 16, 16), chunk(b"ANIM", &[0; 6])]);
        assert!(matches!(
            decode_rgba(&animated),
            Err(DecodeError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn missing_vp8_chunk() {
        let data = riff(&[vp8x(0, 16, 16), chunk(b"EXIF", &[0; 4])]);
        assert!(matches!(
            ImageInfo::from_webp(&data),
            Err(DecodeError::ChunkMissing)
        ));
    }

    #[test]
    fn bad_signatures() {
        let mut data = riff(&[chunk(b"VP8 ", &vp8_header(16, 16))]);
        data[8..12].copy_from_slice(b"WEBQ");
        assert!(matches!(
            decode_rgb(&data),
            Err(DecodeError::WebpSignatureInvalid(sig)) if &sig == b"WEBQ"
        ));

        data[..4].copy_from_slice(b"RIFX");
        assert!(matches!(
            decode_rgb(&data),
            Err(DecodeError::RiffSignatureInvalid(sig)) if &sig == b"RIFX"
        ));
    }

    #[test]
    fn truncated_container() {
        let data = riff(&[chunk(b"VP8 ", &vp8_header(16, 16))]);
        assert!(matches!(
            decode_rgba(&data[..data.len() - 3]),
            Err(DecodeError::StreamTruncated)
        ));
        assert!(matches!(
            decode_rgba(&data[..6]),
            Err(DecodeError::StreamTruncated)
        ));
    }

    #[test]
    fn file_size_limit() {
        let data = riff(&[chunk(b"VP8 ", &vp8_header(16, 16))]);
        let config = DecodeConfig::default().with_limits(Limits::none().with_max_file_size(8));
        assert!(matches!(
            DecodeRequest::new(&config, &data).info(),
            Err(DecodeError::LimitExceeded(_))
        ));
    }
}
