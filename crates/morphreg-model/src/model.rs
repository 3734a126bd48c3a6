use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Output of one registration forward pass.
///
/// `warped` is positional: index 0 is the moving volume warped onto the
/// fixed one; index 1, present only for bidirectional models, is the fixed
/// volume warped onto the moving one.
#[derive(Debug, Clone)]
pub struct Prediction<B: Backend> {
    /// Warped volumes `[B, 1, D, H, W]`.
    pub warped: Vec<Tensor<B, 5>>,
    /// Pre-integration velocity field `[B, 3, d, h, w]`, possibly at reduced
    /// resolution. This is the field the smoothness penalty applies to.
    pub flow: Tensor<B, 5>,
    /// Full-resolution moving-to-fixed displacement `[B, 3, D, H, W]` in
    /// voxel units, channels ordered `(z, y, x)`.
    pub displacement: Tensor<B, 5>,
}

impl<B: Backend> Prediction<B> {
    /// Moving volume warped onto the fixed one; `None` only for a malformed
    /// prediction with no outputs.
    pub fn warped_moving(&self) -> Option<&Tensor<B, 5>> {
        self.warped.first()
    }

    pub fn warped_fixed(&self) -> Option<&Tensor<B, 5>> {
        self.warped.get(1)
    }

    /// Number of warped outputs (1 or 2 for a well-formed prediction).
    pub fn arity(&self) -> usize {
        self.warped.len()
    }
}

/// Capability contract of a dense registration network.
///
/// Inputs are `[B, 1, D, H, W]` volumes. Training additionally requires the
/// implementor to be a burn `AutodiffModule` so the optimizer can reach its
/// parameters.
pub trait RegistrationModel<B: Backend> {
    /// Predict the warp aligning `moving` onto `fixed`.
    fn forward(&self, moving: Tensor<B, 5>, fixed: Tensor<B, 5>) -> Prediction<B>;

    /// Whether [`Prediction::warped`] carries the backward (fixed to moving)
    /// output as well.
    fn bidir(&self) -> bool;
}
