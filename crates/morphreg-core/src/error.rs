//! Error types for volume and landmark construction.

use thiserror::Error;

/// Errors raised while assembling core geometric data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Fixed and moving landmark lists differ in length.
    #[error("Landmark count mismatch: {fixed} fixed vs {moving} moving")]
    LandmarkCountMismatch { fixed: usize, moving: usize },

    /// A landmark set without any correspondence.
    #[error("Landmark set is empty")]
    EmptyLandmarks,

    /// A dense field whose channel axis is not 3 (or whose batch is not 1).
    #[error("Expected a [1, 3, D, H, W] displacement field, got {0:?}")]
    FieldShape(Vec<usize>),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
