//! Error type of the training program.

use thiserror::Error;

/// Errors that abort a training run.
#[derive(Error, Debug)]
pub enum TrainError {
    /// Invalid or unsupported configuration value.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A volume or dataset could not be read or assembled.
    #[error("Data error: {0}")]
    Data(String),

    /// Missing or malformed landmark correspondences.
    #[error("Landmark error: {0}")]
    Landmark(String),

    /// Non-finite loss or metric.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Checkpoint could not be written or restored.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

impl TrainError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn landmark(msg: impl Into<String>) -> Self {
        Self::Landmark(msg.into())
    }

    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Wrap an `anyhow` error chain from the IO layer as a data error.
    pub fn from_io_chain(err: anyhow::Error) -> Self {
        Self::Data(format!("{:#}", err))
    }
}
