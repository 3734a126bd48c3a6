use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};
use morphreg_core::interpolation::{identity_grid, trilinear_sample};
use std::marker::PhantomData;

/// Warps a volume by a dense displacement field.
///
/// `output(x) = image(x + flow(x))`, sampled trilinearly with border clamping.
#[derive(Module, Debug)]
pub struct SpatialTransformer<B: Backend> {
    phantom: PhantomData<B>,
}

impl<B: Backend> SpatialTransformer<B> {
    pub fn new() -> Self {
        Self { phantom: PhantomData }
    }

    /// # Arguments
    /// * `image` - `[B, C, D, H, W]`
    /// * `flow` - `[B, 3, D, H, W]` displacement in voxels, channels `(z, y, x)`
    pub fn forward(&self, image: Tensor<B, 5>, flow: Tensor<B, 5>) -> Tensor<B, 5> {
        let [b, _, d, h, w] = flow.dims();
        let grid = identity_grid::<B>(b, [d, h, w], &flow.device());
        trilinear_sample(image, grid + flow)
    }
}

impl<B: Backend> Default for SpatialTransformer<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_zero_flow_is_identity() {
        let device = Default::default();
        let values: Vec<f32> = (0..64).map(|v| v as f32).collect();
        let image = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, 4, 4, 4]), &device);
        let flow = Tensor::<B, 5>::zeros([1, 3, 4, 4, 4], &device);
        let warped = SpatialTransformer::new().forward(image.clone(), flow);
        let diff: f32 = (warped - image).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_unit_shift_along_x() {
        let device = Default::default();
        let values: Vec<f32> = (0..4).map(|v| v as f32).collect();
        let image = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, 1, 1, 4]), &device);
        let flow = Tensor::<B, 5>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0], [1, 3, 1, 1, 4]),
            &device,
        );
        let warped: Vec<f32> = SpatialTransformer::new()
            .forward(image, flow)
            .into_data()
            .iter::<f32>()
            .collect();
        // Last sample is clamped at the border.
        assert_eq!(warped, vec![1.0, 2.0, 3.0, 3.0]);
    }
}
