//! Registration network, warping, and loss functions.
//!
//! The [`RegistrationModel`] trait is the capability contract the training
//! loop relies on; [`vxm::VxmDense`] is the bundled implementation.

pub mod model;
pub mod spatial_transform;
pub mod integration;
pub mod vxm;
pub mod losses;

pub use model::{Prediction, RegistrationModel};
pub use spatial_transform::SpatialTransformer;
pub use integration::VecInt;
pub use vxm::{VxmDense, VxmDenseConfig};
