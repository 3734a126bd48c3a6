//! Volume type: voxel intensities plus physical voxel spacing.
//!
//! Voxel data is stored `[D, H, W]` (slowest to fastest axis, i.e. z, y, x),
//! while spacing is kept in `(x, y, z)` order to match landmark coordinates.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Physical voxel size along `(x, y, z)`.
pub type Spacing3 = nalgebra::Vector3<f64>;

/// A 3D scalar volume on some backend device.
#[derive(Debug, Clone)]
pub struct Volume<B: Backend> {
    data: Tensor<B, 3>,
    spacing: Spacing3,
}

impl<B: Backend> Volume<B> {
    /// Create a volume from `[D, H, W]` data and `(x, y, z)` spacing.
    pub fn new(data: Tensor<B, 3>, spacing: Spacing3) -> Self {
        Self { data, spacing }
    }

    /// Create a volume with unit spacing.
    pub fn isotropic(data: Tensor<B, 3>) -> Self {
        Self::new(data, Spacing3::new(1.0, 1.0, 1.0))
    }

    pub fn data(&self) -> &Tensor<B, 3> {
        &self.data
    }

    pub fn spacing(&self) -> &Spacing3 {
        &self.spacing
    }

    /// Shape `[D, H, W]`.
    pub fn shape(&self) -> [usize; 3] {
        self.data.dims()
    }

    /// Number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// Model input layout `[1, 1, D, H, W]`.
    pub fn to_batch(&self) -> Tensor<B, 5> {
        let [d, h, w] = self.shape();
        self.data.clone().reshape([1, 1, d, h, w])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_to_batch_layout() {
        let device = Default::default();
        let volume = Volume::<B>::isotropic(Tensor::zeros([4, 5, 6], &device));
        assert_eq!(volume.shape(), [4, 5, 6]);
        assert_eq!(volume.num_voxels(), 120);
        assert_eq!(volume.to_batch().dims(), [1, 1, 4, 5, 6]);
    }
}
