use thiserror::Error;

/// Errors produced while constructing or running a stack search.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Layer or image dimensions do not match the rest of the stack.
    #[error("image dimensions mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        /// Expected width in pixels.
        expected_width: usize,
        /// Expected height in pixels.
        expected_height: usize,
        /// Actual width in pixels.
        width: usize,
        /// Actual height in pixels.
        height: usize,
    },

    /// A stack must contain at least one image.
    #[error("image stack is empty")]
    EmptyStack,

    /// Image index outside the stack.
    #[error("image index {index} out of range for stack of {count} images")]
    ImageIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of images in the stack.
        count: usize,
    },

    /// PSF kernel construction failure (non-square, even-sized, negative
    /// weights, non-positive sigma, or an oversized radius).
    #[error("invalid PSF: {0}")]
    InvalidPsf(String),

    /// Quantization width other than 1, 2 or 4 bytes.
    #[error("invalid psi/phi encoding width: {0} bytes")]
    InvalidEncoding(u32),

    /// Sigma-G percentile bounds must satisfy 0 <= low < high <= 100.
    #[error("invalid sigma-G percentile bounds: ({low}, {high})")]
    InvalidPercentiles {
        /// Lower percentile.
        low: f32,
        /// Upper percentile.
        high: f32,
    },

    /// Sigma-G coefficient must be positive.
    #[error("invalid sigma-G coefficient: {0}")]
    InvalidSigmaGCoeff(f32),

    /// Stamp radius outside the supported range.
    #[error("invalid stamp radius: {radius} (edge must be between 3 and {max_edge} pixels)")]
    InvalidStampRadius {
        /// Requested radius.
        radius: usize,
        /// Largest supported stamp edge.
        max_edge: usize,
    },

    /// A per-time selection vector does not match the stack length.
    #[error("use_index length {actual} does not match image count {expected}")]
    UseIndexMismatch {
        /// Number of images in the stack.
        expected: usize,
        /// Length of the supplied selection vector.
        actual: usize,
    },

    /// Mismatched batch inputs or otherwise unusable search parameters.
    #[error("invalid search input: {0}")]
    InvalidInput(String),
}
