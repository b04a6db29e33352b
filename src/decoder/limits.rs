//! Configurable limits for VP8 decoding.
//!
//! These limits protect against malicious or malformed inputs that could
//! cause excessive memory usage or processing time. Every check runs before
//! the corresponding allocation.

use super::api::DecodeError;

/// Configuration for decode limits.
///
/// All limits are optional; `None` means unlimited.
///
/// # Example
///
/// ```rust
/// use zenvp8::Limits;
///
/// // Start with defaults and customize
/// let limits = Limits::default()
///     .with_max_dimensions(4096, 4096)
///     .with_max_memory(256 * 1024 * 1024);  // 256 MB
///
/// // Or start with no limits for trusted inputs
/// let unlimited = Limits::none();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Limits {
    /// Maximum image width in pixels.
    pub max_width: Option<u32>,

    /// Maximum image height in pixels.
    pub max_height: Option<u32>,

    /// Maximum total pixels (width * height).
    /// Useful for limiting memory even with odd aspect ratios.
    pub max_total_pixels: Option<u64>,

    /// Maximum input size in bytes.
    pub max_file_size: Option<u64>,

    /// Maximum memory used for planes and output pixels, in bytes.
    pub max_memory: Option<u64>,
}

impl Default for Limits {
    /// Default limits suitable for server-side use.
    ///
    /// - Max dimensions: 16384 x 16384 (VP8 can code at most 16383)
    /// - Max total pixels: 100 megapixels
    /// - Max input size: 100 MB
    /// - Max memory: 1 GB
    fn default() -> Self {
        Self {
            max_width: Some(16384),
            max_height: Some(16384),
            max_total_pixels: Some(100_000_000),
            max_file_size: Some(100 * 1024 * 1024),
            max_memory: Some(1024 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// Create limits with no restrictions.
    ///
    /// **Warning**: Only use this for trusted inputs!
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_total_pixels: None,
            max_file_size: None,
            max_memory: None,
        }
    }

    /// Set maximum dimensions.
    #[must_use]
    pub fn with_max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Set maximum total pixels.
    #[must_use]
    pub fn with_max_total_pixels(mut self, pixels: u64) -> Self {
        self.max_total_pixels = Some(pixels);
        self
    }

    /// Set maximum input size in bytes.
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Set maximum memory usage in bytes.
    #[must_use]
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Check if dimensions are within limits.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        within("width", u64::from(width), self.max_width.map(u64::from))?;
        within("height", u64::from(height), self.max_height.map(u64::from))?;
        within(
            "total pixels",
            u64::from(width) * u64::from(height),
            self.max_total_pixels,
        )
    }

    /// Check if the input size is within limits.
    pub fn check_file_size(&self, size: u64) -> Result<(), DecodeError> {
        within("input size in bytes", size, self.max_file_size)
    }

    /// Check if the bytes about to be allocated for planes or output pixels
    /// are within limits.
    pub fn check_memory(&self, bytes: u64) -> Result<(), DecodeError> {
        within("buffer size in bytes", bytes, self.max_memory)
    }
}

fn within(what: &str, value: u64, limit: Option<u64>) -> Result<(), DecodeError> {
    match limit {
        Some(max) if value > max => Err(DecodeError::LimitExceeded(alloc::format!(
            "{what} {value} exceeds limit {max}"
        ))),
        _ => Ok(()),
    }
}
