//! Anatomical landmark correspondences and displacement statistics.
//!
//! A [`LandmarkSet`] pairs each landmark in the fixed volume with its
//! counterpart in the moving volume. Coordinates are continuous voxel
//! indices in `(x, y, z)` order.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::volume::Spacing3;

/// A landmark position in continuous voxel coordinates `(x, y, z)`.
pub type Point3 = nalgebra::Point3<f64>;

/// Paired fixed/moving landmarks of one held-out sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    fixed: Vec<Point3>,
    moving: Vec<Point3>,
}

impl LandmarkSet {
    /// Pair two landmark lists. Both must be non-empty and of equal length.
    pub fn new(fixed: Vec<Point3>, moving: Vec<Point3>) -> Result<Self> {
        if fixed.len() != moving.len() {
            return Err(CoreError::LandmarkCountMismatch {
                fixed: fixed.len(),
                moving: moving.len(),
            });
        }
        if fixed.is_empty() {
            return Err(CoreError::EmptyLandmarks);
        }
        Ok(Self { fixed, moving })
    }

    pub fn fixed(&self) -> &[Point3] {
        &self.fixed
    }

    pub fn moving(&self) -> &[Point3] {
        &self.moving
    }

    pub fn len(&self) -> usize {
        self.fixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixed.is_empty()
    }

    /// Per-landmark Euclidean error between warped fixed landmarks and their
    /// moving counterparts, scaled to physical units by `spacing`.
    ///
    /// `displacements[i]` is the deformation sampled at `fixed[i]`, in voxel
    /// units and `(x, y, z)` order.
    pub fn displacement_errors(&self, displacements: &[Vector3<f64>], spacing: &Spacing3) -> Vec<f64> {
        debug_assert_eq!(displacements.len(), self.fixed.len());
        self.fixed
            .iter()
            .zip(&self.moving)
            .zip(displacements)
            .map(|((f, m), u)| {
                let residual = f.coords + u - m.coords;
                residual.component_mul(spacing).norm()
            })
            .collect()
    }
}

/// Mean and population standard deviation of a set of errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplacementStats {
    pub mean: f64,
    pub std: f64,
}

impl DisplacementStats {
    /// Summarise `errors`. An empty slice yields `NaN` for both fields.
    pub fn from_errors(errors: &[f64]) -> Self {
        if errors.is_empty() {
            return Self { mean: f64::NAN, std: f64::NAN };
        }
        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let var = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        Self { mean, std: var.sqrt() }
    }
}
