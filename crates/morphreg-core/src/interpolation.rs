//! Trilinear sampling of batched volumes.
//!
//! All grids are in voxel coordinates with channel order `(z, y, x)`,
//! matching the `[D, H, W]` data layout. Samples outside the volume are
//! clamped to the border.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Sample `image` at the positions given by `grid`.
///
/// # Arguments
/// * `image` - Input volume `[B, C, D, H, W]`
/// * `grid` - Sampling positions `[B, 3, D', H', W']`
///
/// # Returns
/// * Interpolated volume `[B, C, D', H', W']`
pub fn trilinear_sample<B: Backend>(image: Tensor<B, 5>, grid: Tensor<B, 5>) -> Tensor<B, 5> {
    let [b, c, d, h, w] = image.dims();
    let [_, _, od, oh, ow] = grid.dims();
    let n_out = od * oh * ow;

    let z = grid.clone().slice([0..b, 0..1, 0..od, 0..oh, 0..ow]);
    let y = grid.clone().slice([0..b, 1..2, 0..od, 0..oh, 0..ow]);
    let x = grid.slice([0..b, 2..3, 0..od, 0..oh, 0..ow]);

    let z0 = z.clone().floor();
    let z1 = z0.clone().add_scalar(1.0);
    let y0 = y.clone().floor();
    let y1 = y0.clone().add_scalar(1.0);
    let x0 = x.clone().floor();
    let x1 = x0.clone().add_scalar(1.0);

    let wz1 = z.sub(z0.clone());
    let wz0 = wz1.clone().neg().add_scalar(1.0);
    let wy1 = y.sub(y0.clone());
    let wy0 = wy1.clone().neg().add_scalar(1.0);
    let wx1 = x.sub(x0.clone());
    let wx0 = wx1.clone().neg().add_scalar(1.0);

    let z0_idx = z0.clamp(0.0, (d - 1) as f32).int();
    let z1_idx = z1.clamp(0.0, (d - 1) as f32).int();
    let y0_idx = y0.clamp(0.0, (h - 1) as f32).int();
    let y1_idx = y1.clamp(0.0, (h - 1) as f32).int();
    let x0_idx = x0.clamp(0.0, (w - 1) as f32).int();
    let x1_idx = x1.clamp(0.0, (w - 1) as f32).int();

    let flat_img = image.reshape([b, c, d * h * w]);

    let stride_d = (h * w) as i32;
    let stride_h = w as i32;

    let z0_off = z0_idx.mul_scalar(stride_d);
    let z1_off = z1_idx.mul_scalar(stride_d);
    let y0_off = y0_idx.mul_scalar(stride_h);
    let y1_off = y1_idx.mul_scalar(stride_h);

    let gather_val = |idx: Tensor<B, 5, Int>| -> Tensor<B, 5> {
        let flat_idx = idx.reshape([b, 1, n_out]);
        let flat_idx = if c > 1 { flat_idx.repeat(&[1, c, 1]) } else { flat_idx };
        flat_img
            .clone()
            .gather(2, flat_idx)
            .reshape([b, c, od, oh, ow])
    };

    let idx_00 = z0_off.clone() + y0_off.clone();
    let idx_01 = z0_off + y1_off.clone();
    let idx_10 = z1_off.clone() + y0_off;
    let idx_11 = z1_off + y1_off;

    let v000 = gather_val(idx_00.clone() + x0_idx.clone());
    let v001 = gather_val(idx_00 + x1_idx.clone());
    let v010 = gather_val(idx_01.clone() + x0_idx.clone());
    let v011 = gather_val(idx_01 + x1_idx.clone());
    let v100 = gather_val(idx_10.clone() + x0_idx.clone());
    let v101 = gather_val(idx_10 + x1_idx.clone());
    let v110 = gather_val(idx_11.clone() + x0_idx);
    let v111 = gather_val(idx_11 + x1_idx);

    // x, then y, then z
    let w00 = v000 * wx0.clone() + v001 * wx1.clone();
    let w01 = v010 * wx0.clone() + v011 * wx1.clone();
    let w10 = v100 * wx0.clone() + v101 * wx1.clone();
    let w11 = v110 * wx0 + v111 * wx1;

    let w0 = w00 * wy0.clone() + w01 * wy1.clone();
    let w1 = w10 * wy0 + w11 * wy1;

    w0 * wz0 + w1 * wz1
}

/// Identity sampling grid `[B, 3, D, H, W]` whose channels hold the voxel
/// index of each position.
pub fn identity_grid<B: Backend>(batch: usize, shape: [usize; 3], device: &B::Device) -> Tensor<B, 5> {
    scaled_grid(batch, shape, [1.0; 3], device)
}

/// Grid for resampling a volume to `shape` with corner-aligned scaling:
/// output index `i` along an axis maps to input position `i * scale`.
pub fn scaled_grid<B: Backend>(
    batch: usize,
    shape: [usize; 3],
    scale: [f32; 3],
    device: &B::Device,
) -> Tensor<B, 5> {
    let [d, h, w] = shape;
    let zeros = Tensor::<B, 5>::zeros([batch, 1, d, h, w], device);

    let d_range = Tensor::<B, 1, Int>::arange(0..d as i64, device)
        .float()
        .mul_scalar(scale[0])
        .reshape([1, 1, d, 1, 1]);
    let h_range = Tensor::<B, 1, Int>::arange(0..h as i64, device)
        .float()
        .mul_scalar(scale[1])
        .reshape([1, 1, 1, h, 1]);
    let w_range = Tensor::<B, 1, Int>::arange(0..w as i64, device)
        .float()
        .mul_scalar(scale[2])
        .reshape([1, 1, 1, 1, w]);

    Tensor::cat(
        vec![zeros.clone() + d_range, zeros.clone() + h_range, zeros + w_range],
        1,
    )
}

/// Resample `image` `[B, C, D, H, W]` to a new spatial `shape` using
/// corner-aligned trilinear interpolation.
pub fn resize<B: Backend>(image: Tensor<B, 5>, shape: [usize; 3]) -> Tensor<B, 5> {
    let [b, _, d, h, w] = image.dims();
    if [d, h, w] == shape {
        return image;
    }
    let axis_scale = |input: usize, output: usize| -> f32 {
        if output > 1 {
            (input - 1) as f32 / (output - 1) as f32
        } else {
            0.0
        }
    };
    let scale = [
        axis_scale(d, shape[0]),
        axis_scale(h, shape[1]),
        axis_scale(w, shape[2]),
    ];
    let grid = scaled_grid(b, shape, scale, &image.device());
    trilinear_sample(image, grid)
}
