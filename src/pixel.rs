//! Type-safe pixel format traits for decoding and encoding.
//!
//! When the `pixel-types` feature is enabled, you can use generic pixel types
//! from the [`rgb`] crate instead of raw byte slices:
//!
//! ```rust,no_run
//! use zenvp8::pixel;
//! use rgb::{Rgba, Rgb};
//!
//! // Decode to typed pixels
//! let webp_data: &[u8] = &[]; // your WebP data
//! let (pixels, w, h): (Vec<Rgba<u8>>, u32, u32) = pixel::decode(webp_data)?;
//!
//! // Encode from typed pixels
//! use zenvp8::EncoderConfig;
//! let pixels: Vec<Rgb<u8>> = vec![Rgb::new(255, 0, 0); 4 * 4];
//! let webp = EncoderConfig::new().encode_pixels(&pixels, 4, 4)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use alloc::vec::Vec;

use rgb::{AsPixels, ComponentBytes, Rgb, Rgba};

use crate::decoder::DecodeError;
use crate::encoder::{EncodeError, EncodeRequest, EncoderConfig, PixelLayout};

mod private {
    pub trait Sealed {}
}

/// Pixel type that can be decoded from WebP.
pub trait DecodePixel: Copy + 'static + private::Sealed {
    /// Number of color channels (3 for RGB, 4 for RGBA).
    const CHANNELS: usize;
    /// Whether this pixel type includes alpha. Decoded alpha is always 255.
    const HAS_ALPHA: bool;
}

/// Pixel type that can be encoded to WebP.
pub trait EncodePixel: Copy + 'static + private::Sealed {
    /// Number of color channels.
    const CHANNELS: usize;
    /// The corresponding [`PixelLayout`] for encoding.
    fn layout() -> PixelLayout;
}

impl private::Sealed for Rgb<u8> {}
impl private::Sealed for Rgba<u8> {}

impl DecodePixel for Rgb<u8> {
    const CHANNELS: usize = 3;
    const HAS_ALPHA: bool = false;
}

impl DecodePixel for Rgba<u8> {
    const CHANNELS: usize = 4;
    const HAS_ALPHA: bool = true;
}

impl EncodePixel for Rgb<u8> {
    const CHANNELS: usize = 3;
    fn layout() -> PixelLayout {
        PixelLayout::Rgb8
    }
}

impl EncodePixel for Rgba<u8> {
    const CHANNELS: usize = 4;
    fn layout() -> PixelLayout {
        PixelLayout::Rgba8
    }
}

fn decode_bytes<P: DecodePixel>(data: &[u8]) -> Result<(Vec<u8>, u32, u32), DecodeError> {
    if P::HAS_ALPHA {
        crate::decode_rgba(data)
    } else {
        crate::decode_rgb(data)
    }
}

/// Decode WebP data into a vector of typed pixels.
///
/// Returns `(pixels, width, height)`.
pub fn decode<P: DecodePixel>(data: &[u8]) -> Result<(Vec<P>, u32, u32), DecodeError>
where
    [u8]: AsPixels<P>,
{
    let (bytes, w, h) = decode_bytes::<P>(data)?;
    let pixels: &[P] = bytes.as_pixels();
    Ok((pixels.to_vec(), w, h))
}

/// Decode WebP data, appending typed pixels to an existing [`Vec`].
///
/// Returns `(width, height)` of the decoded image.
pub fn decode_append<P: DecodePixel>(
    data: &[u8],
    output: &mut Vec<P>,
) -> Result<(u32, u32), DecodeError>
where
    [u8]: AsPixels<P>,
{
    let (bytes, w, h) = decode_bytes::<P>(data)?;
    let pixels: &[P] = bytes.as_pixels();
    output.extend_from_slice(pixels);
    Ok((w, h))
}

/// Encode typed pixel data to WebP with default settings.
pub fn encode<P: EncodePixel>(pixels: &[P], width: u32, height: u32) -> Result<Vec<u8>, EncodeError>
where
    [P]: ComponentBytes<u8>,
{
    EncoderConfig::new().encode_pixels(pixels, width, height)
}

impl EncoderConfig {
    /// Encode typed pixel data to WebP.
    ///
    /// Supports [`Rgb<u8>`] and [`Rgba<u8>`].
    pub fn encode_pixels<P: EncodePixel>(
        &self,
        pixels: &[P],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, EncodeError>
    where
        [P]: ComponentBytes<u8>,
    {
        let bytes: &[u8] = pixels.as_bytes();
        EncodeRequest::new(self, bytes, P::layout(), width, height).encode()
    }
}
