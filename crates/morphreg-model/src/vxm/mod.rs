//! VoxelMorph-style dense registration network.

pub mod unet;

use crate::integration::VecInt;
use crate::model::{Prediction, RegistrationModel};
use crate::spatial_transform::SpatialTransformer;
use burn::{
    nn::{
        conv::{Conv3d, Conv3dConfig},
        Initializer, PaddingConfig3d,
    },
    prelude::*,
};
use morphreg_core::interpolation::resize;
use unet::{Unet, UnetConfig};

#[derive(Config, Debug)]
pub struct VxmDenseConfig {
    #[config(default = "vec![16, 32, 32, 32]")]
    pub enc_features: Vec<usize>,
    #[config(default = "vec![32, 32, 32, 32, 32, 16, 16]")]
    pub dec_features: Vec<usize>,
    /// Scaling-and-squaring steps; 0 disables integration.
    #[config(default = 7)]
    pub int_steps: usize,
    /// Resolution reduction factor of the integrated field.
    #[config(default = 2)]
    pub int_downsize: usize,
    #[config(default = false)]
    pub bidir: bool,
}

/// Dense registration network: U-Net features, a 3-channel flow head,
/// optional diffeomorphic integration and a spatial transformer.
#[derive(Module, Debug)]
pub struct VxmDense<B: Backend> {
    unet: Unet<B>,
    flow: Conv3d<B>,
    integrate: Option<VecInt<B>>,
    transformer: SpatialTransformer<B>,
    int_downsize: usize,
    bidir: bool,
}

impl VxmDenseConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> VxmDense<B> {
        let unet: Unet<B> =
            UnetConfig::new(self.enc_features.clone(), self.dec_features.clone()).init(device);

        // Near-zero initial flow so training starts from the identity warp.
        let flow = Conv3dConfig::new([unet.out_channels(), 3], [3, 3, 3])
            .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
            .with_initializer(Initializer::Normal {
                mean: 0.0,
                std: 1e-5,
            })
            .init(device);

        let integrate = (self.int_steps > 0).then(|| VecInt::new(self.int_steps));

        let model = VxmDense {
            unet,
            flow,
            integrate,
            transformer: SpatialTransformer::new(),
            int_downsize: self.int_downsize.max(1),
            bidir: self.bidir,
        };
        tracing::info!(num_params = model.num_params(), bidir = self.bidir, "Initialized VxmDense");
        model
    }
}

impl<B: Backend> VxmDense<B> {
    fn integrate_full(&self, velocity: Tensor<B, 5>, full: [usize; 3]) -> Tensor<B, 5> {
        let field = match &self.integrate {
            Some(integrate) => integrate.forward(velocity),
            None => velocity,
        };
        if self.int_downsize > 1 {
            resize(field, full).mul_scalar(self.int_downsize as f32)
        } else {
            field
        }
    }
}

impl<B: Backend> RegistrationModel<B> for VxmDense<B> {
    fn forward(&self, moving: Tensor<B, 5>, fixed: Tensor<B, 5>) -> Prediction<B> {
        let [_, _, d, h, w] = moving.dims();

        let features = self.unet.forward(Tensor::cat(vec![moving.clone(), fixed.clone()], 1));
        let mut velocity = self.flow.forward(features);

        if self.int_downsize > 1 {
            let f = self.int_downsize;
            let reduced = [(d / f).max(1), (h / f).max(1), (w / f).max(1)];
            velocity = resize(velocity, reduced).mul_scalar(1.0 / f as f32);
        }

        let pos = self.integrate_full(velocity.clone(), [d, h, w]);
        let mut warped = vec![self.transformer.forward(moving, pos.clone())];

        if self.bidir {
            let neg = self.integrate_full(velocity.clone().neg(), [d, h, w]);
            warped.push(self.transformer.forward(fixed, neg));
        }

        Prediction {
            warped,
            flow: velocity,
            displacement: pos,
        }
    }

    fn bidir(&self) -> bool {
        self.bidir
    }
}
