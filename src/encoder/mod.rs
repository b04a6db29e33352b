//! Lossy WebP encoder built on a VP8 keyframe

mod api;
pub(crate) mod arithmetic;
mod vec_writer;
/// VP8 keyframe encoder
mod vp8;

// Re-export public API
pub use api::{
    encode_rgb, encode_rgba, EncodeError, EncodeRequest, EncodeStats, EncodedFrame,
    EncoderConfig, PixelLayout, MAX_DIMENSION,
};
