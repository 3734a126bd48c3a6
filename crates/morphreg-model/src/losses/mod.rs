//! Similarity and regularization losses.

pub mod trait_;
pub mod ncc;
pub mod mse;
pub mod grad;

pub use trait_::{FlowRegularizer, SimilarityLoss};
pub use ncc::LocalNccLoss;
pub use mse::MseLoss;
pub use grad::{GradLoss, Penalty};
