//! Host-side dense displacement field for point queries.
//!
//! Landmark mapping needs a handful of point samples from a full-resolution
//! field, so the field is pulled off the device once and sampled on the CPU.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use nalgebra::Vector3;

use crate::error::{CoreError, Result};
use crate::landmarks::Point3;

/// A `[3, D, H, W]` displacement field in voxel units.
///
/// Channel `k` holds the displacement along data axis `k` (`z`, `y`, `x`).
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementField {
    data: Vec<f32>,
    shape: [usize; 3],
}

impl DisplacementField {
    /// Copy a `[1, 3, D, H, W]` field tensor to host memory.
    pub fn from_tensor<B: Backend>(field: Tensor<B, 5>) -> Result<Self> {
        let dims = field.dims();
        if dims[0] != 1 || dims[1] != 3 {
            return Err(CoreError::FieldShape(dims.to_vec()));
        }
        let data = field.into_data().iter::<f32>().collect();
        Ok(Self {
            data,
            shape: [dims[2], dims[3], dims[4]],
        })
    }

    /// Build a field from raw `[3, D, H, W]` values.
    pub fn from_vec(data: Vec<f32>, shape: [usize; 3]) -> Result<Self> {
        if data.len() != 3 * shape.iter().product::<usize>() {
            return Err(CoreError::FieldShape(vec![data.len(), shape[0], shape[1], shape[2]]));
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    fn at(&self, channel: usize, z: usize, y: usize, x: usize) -> f64 {
        let [d, h, w] = self.shape;
        self.data[((channel * d + z) * h + y) * w + x] as f64
    }

    /// Trilinearly interpolated displacement at `point` (`(x, y, z)` voxel
    /// coordinates), returned in `(x, y, z)` order. Positions outside the
    /// field are clamped to the border.
    pub fn sample(&self, point: &Point3) -> Vector3<f64> {
        let [d, h, w] = self.shape;
        let axis = |p: f64, n: usize| -> (usize, usize, f64) {
            let max = (n - 1) as f64;
            let p = p.clamp(0.0, max);
            let lo = p.floor();
            let hi = (lo + 1.0).min(max);
            (lo as usize, hi as usize, p - lo)
        };
        let (z0, z1, tz) = axis(point.z, d);
        let (y0, y1, ty) = axis(point.y, h);
        let (x0, x1, tx) = axis(point.x, w);

        let mut out = [0.0f64; 3];
        for (channel, value) in out.iter_mut().enumerate() {
            let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
            let c00 = lerp(self.at(channel, z0, y0, x0), self.at(channel, z0, y0, x1), tx);
            let c01 = lerp(self.at(channel, z0, y1, x0), self.at(channel, z0, y1, x1), tx);
            let c10 = lerp(self.at(channel, z1, y0, x0), self.at(channel, z1, y0, x1), tx);
            let c11 = lerp(self.at(channel, z1, y1, x0), self.at(channel, z1, y1, x1), tx);
            let c0 = lerp(c00, c01, ty);
            let c1 = lerp(c10, c11, ty);
            *value = lerp(c0, c1, tz);
        }
        Vector3::new(out[2], out[1], out[0])
    }

    /// Sample the field at every point.
    pub fn sample_points(&self, points: &[Point3]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.sample(p)).collect()
    }
}
