//! # Core Error Types

use thiserror::Error;

/// Errors raised by the core primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Latitude outside the range the mercator projection can represent.
    #[error("latitude {0} is outside the projectable range")]
    LatitudeOutOfRange(f64),

    /// Map scale must be finite and at least 1.
    #[error("invalid map scale: {0}")]
    InvalidScale(f64),

    /// Scratch pools need a non-zero floor size.
    #[error("scratch floor size must be greater than zero")]
    ZeroScratchFloor,
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
