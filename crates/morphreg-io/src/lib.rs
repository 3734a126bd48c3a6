pub mod nifti_io;
pub mod landmark_io;
pub mod listing;

pub use nifti_io::{read_volume, write_volume};
pub use landmark_io::{parse_landmarks, read_landmarks};
pub use listing::{list_landmark_files, list_volume_files, SplitFiles};
