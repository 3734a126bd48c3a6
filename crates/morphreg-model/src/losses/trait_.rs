use burn::tensor::{backend::Backend, Tensor};

/// Image similarity term between a target volume and a prediction.
///
/// Lower is better; both inputs are `[B, C, D, H, W]` with equal shapes.
pub trait SimilarityLoss<B: Backend> {
    /// Scalar loss as a rank-1 tensor of length 1.
    fn compute(&self, target: Tensor<B, 5>, prediction: Tensor<B, 5>) -> Tensor<B, 1>;

    fn name(&self) -> &'static str;
}

/// Smoothness penalty on a deformation field. It needs no target.
pub trait FlowRegularizer<B: Backend> {
    fn compute(&self, flow: Tensor<B, 5>) -> Tensor<B, 1>;

    fn name(&self) -> &'static str;
}
