use super::trait_::SimilarityLoss;
use burn::tensor::{backend::Backend, Tensor};

/// Mean squared intensity difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl MseLoss {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> SimilarityLoss<B> for MseLoss {
    fn compute(&self, target: Tensor<B, 5>, prediction: Tensor<B, 5>) -> Tensor<B, 1> {
        (target - prediction).powf_scalar(2.0).mean()
    }

    fn name(&self) -> &'static str {
        "mse"
    }
}
