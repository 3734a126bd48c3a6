use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use morphreg_core::{Spacing3, Volume};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// Read a NIfTI volume (`.nii` or `.nii.gz`).
///
/// Voxel data is returned in `[Z, Y, X]` layout; spacing comes from the
/// header `pixdim` in `(x, y, z)` order. Non-positive spacings fall back to 1.
pub fn read_volume<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Volume<B>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;

    let pixdim = obj.header().pixdim;
    let axis_spacing = |v: f32| if v.is_finite() && v > 0.0 { v as f64 } else { 1.0 };
    let spacing = Spacing3::new(
        axis_spacing(pixdim[1]),
        axis_spacing(pixdim[2]),
        axis_spacing(pixdim[3]),
    );

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("Failed to convert {} to ndarray", path.display()))?;

    let shape = array.shape().to_vec();
    let [nx, ny, nz] = match shape.as_slice() {
        [x, y, z] => [*x, *y, *z],
        [x, y, z, 1] => [*x, *y, *z],
        other => anyhow::bail!(
            "Expected 3D NIfTI volume in {}, found shape {:?}",
            path.display(),
            other
        ),
    };

    // Logical (row-major) order regardless of the on-disk layout.
    let values: Vec<f32> = array.iter().copied().collect();
    let data = TensorData::new(values, Shape::new([nx, ny, nz]));
    let tensor = Tensor::<B, 3>::from_data(data, device).permute([2, 1, 0]);

    tracing::debug!(path = %path.display(), shape = ?[nz, ny, nx], "Read volume");
    Ok(Volume::new(tensor, spacing))
}

/// Write a volume to a NIfTI file, compressing when the path ends in `.gz`.
pub fn write_volume<B: Backend, P: AsRef<Path>>(path: P, volume: &Volume<B>) -> Result<()> {
    use ndarray::Array3;

    let [nz, ny, nx] = volume.shape();
    let data = volume.data().clone().permute([2, 1, 0]).into_data();
    let values: Vec<f32> = data.iter::<f32>().collect();

    let array = Array3::from_shape_vec((nx, ny, nz), values)
        .map_err(|e| anyhow::anyhow!("Failed to create ndarray: {}", e))?;

    let spacing = volume.spacing();
    let mut header = NiftiHeader::default();
    header.pixdim[1] = spacing.x as f32;
    header.pixdim[2] = spacing.y as f32;
    header.pixdim[3] = spacing.z as f32;

    let path = path.as_ref();
    nifti::writer::WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&array)
        .map_err(|e| anyhow::anyhow!("Failed to write NIfTI file {}: {}", path.display(), e))?;

    Ok(())
}
