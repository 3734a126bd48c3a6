use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use morphreg_core::interpolation::{identity_grid, trilinear_sample};
use std::marker::PhantomData;

/// Scaling and squaring of a stationary velocity field.
///
/// The velocity is divided by `2^steps`, then composed with itself `steps`
/// times: `u <- u + u(x + u(x))`. The result approximates `exp(v)` and is
/// returned as a displacement in voxels.
#[derive(Module, Debug)]
pub struct VecInt<B: Backend> {
    steps: usize,
    phantom: PhantomData<B>,
}

impl<B: Backend> VecInt<B> {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            phantom: PhantomData,
        }
    }

    pub fn nsteps(&self) -> usize {
        self.steps
    }

    /// `[B, 3, D, H, W]` velocity to a displacement of the same shape.
    pub fn forward(&self, velocity: Tensor<B, 5>) -> Tensor<B, 5> {
        if self.steps == 0 {
            return velocity;
        }
        let [b, _, d, h, w] = velocity.dims();
        // One grid serves every squaring step.
        let grid = identity_grid::<B>(b, [d, h, w], &velocity.device());
        let mut disp = velocity.div_scalar(2.0f32.powi(self.steps as i32));
        for _ in 0..self.steps {
            let composed = trilinear_sample(disp.clone(), grid.clone() + disp.clone());
            disp = disp + composed;
        }
        disp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_constant_velocity_integrates_to_itself() {
        let device = Default::default();
        // A uniform velocity composes with itself exactly: exp(v) = v.
        let flow = Tensor::<B, 5>::ones([1, 3, 6, 6, 6], &device).mul_scalar(0.5);
        let disp = VecInt::new(5).forward(flow.clone());
        let diff: f32 = (disp - flow).abs().max().into_scalar();
        assert!(diff < 1e-4);
    }

    #[test]
    fn test_zero_steps_is_identity() {
        let device = Default::default();
        let flow = Tensor::<B, 5>::ones([1, 3, 2, 2, 2], &device);
        let disp = VecInt::new(0).forward(flow.clone());
        let diff: f32 = (disp - flow).abs().max().into_scalar();
        assert_eq!(diff, 0.0);
    }
}
