//! VP8 keyframe decoder and the lossy WebP container around it

mod api;
pub(crate) mod arithmetic;
mod limits;
mod loop_filter;
pub(crate) mod yuv;

// Public VP8 decoder module
pub mod vp8;

// Re-export public API
pub use api::{
    decode_rgb, decode_rgba, decode_yuv420, DecodeConfig, DecodeError, DecodeRequest, ImageInfo,
    UpsamplingMethod, YuvPlanes,
};
pub use limits::Limits;

pub(crate) use api::WebPRiffChunk;
pub(crate) use loop_filter::{filter_frame, FilterSettings, Planes};
