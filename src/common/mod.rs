//! Common types and utilities shared between encoder and decoder

pub(crate) mod prediction;
/// DCT/IDCT transform functions
pub(crate) mod transform;
pub mod types;
