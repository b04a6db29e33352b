//! Decoding and encoding of lossy WebP images through the VP8 keyframe codec
//!
//! This crate implements the VP8 intra (keyframe) format that lossy WebP
//! stores in its `VP8 ` chunk: the boolean arithmetic coder, the transforms,
//! intra prediction, coefficient tokens and the loop filter, in both
//! directions.
//!
//! # Features
//!
//! - `std` (default): `std::io::Write` output and the IO error variant.
//! - `pixel-types`: typed decode/encode through the [`rgb`] crate's pixels.
//!
//! # no_std Support
//!
//! Decoding and encoding work in `no_std` environments (requires `alloc`):
//! ```toml
//! [dependencies]
//! zenvp8 = { version = "...", default-features = false }
//! ```
//!
//! All decoding functions take `&[u8]` slices directly - no Read/Seek traits required.
//!
//! # Encoding
//!
//! ```rust
//! use zenvp8::{EncodeRequest, EncoderConfig, PixelLayout};
//!
//! let config = EncoderConfig::new().with_quality(85);
//! let rgba_data = vec![255u8; 4 * 4 * 4]; // 4x4 RGBA image
//! let webp = EncodeRequest::new(&config, &rgba_data, PixelLayout::Rgba8, 4, 4).encode()?;
//! # Ok::<(), zenvp8::EncodeError>(())
//! ```
//!
//! # Decoding
//!
//! Use the convenience functions:
//!
//! ```rust,no_run
//! let webp_data: &[u8] = &[]; // your WebP data
//! let (pixels, width, height) = zenvp8::decode_rgba(webp_data)?;
//! # Ok::<(), zenvp8::DecodeError>(())
//! ```
//!
//! Or a [`DecodeRequest`] for limits, upsampling and cancellation:
//!
//! ```rust,no_run
//! use zenvp8::{DecodeConfig, DecodeRequest, Limits};
//!
//! let webp_data: &[u8] = &[]; // your WebP data
//! let config = DecodeConfig::new().with_limits(Limits::default().with_max_dimensions(4096, 4096));
//! let planes = DecodeRequest::new(&config, webp_data).decode_yuv420()?;
//! # Ok::<(), zenvp8::DecodeError>(())
//! ```
//!
//! A bare VP8 payload, without the RIFF container, goes through
//! [`vp8::Vp8Decoder::decode_frame`].

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

// Core modules
pub mod common;
pub mod decoder;
pub mod encoder;

// Slice reader utility (used by the decoder)
mod slice_reader;

/// Type-safe pixel format traits for decoding and encoding.
#[cfg(feature = "pixel-types")]
pub mod pixel;

// Re-export decoder public API
pub use decoder::{
    decode_rgb, decode_rgba, decode_yuv420, DecodeConfig, DecodeError, DecodeRequest, ImageInfo,
    Limits, UpsamplingMethod, YuvPlanes,
};

// Re-export encoder public API
pub use encoder::{
    encode_rgb, encode_rgba, EncodeError, EncodeRequest, EncodeStats, EncodedFrame,
    EncoderConfig, PixelLayout,
};

// Re-export cooperative cancellation types
pub use enough::{Stop, StopReason, Unstoppable};

// Re-export VP8 decoder (public module)
pub use decoder::vp8;
