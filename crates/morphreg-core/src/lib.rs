pub mod error;
pub mod volume;
pub mod landmarks;
pub mod field;
pub mod interpolation;

pub use error::{CoreError, Result};
pub use volume::{Volume, Spacing3};
pub use landmarks::{LandmarkSet, DisplacementStats, Point3};
pub use field::DisplacementField;
