use burn::{
    nn::{
        conv::{Conv3d, Conv3dConfig},
        PaddingConfig3d,
    },
    prelude::*,
    tensor::activation::leaky_relu,
};
use morphreg_core::interpolation::resize;

/// 3x3x3 convolution followed by LeakyReLU(0.2).
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv3d<B>,
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = 1)]
    stride: usize,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        ConvBlock {
            conv: Conv3dConfig::new([self.in_channels, self.out_channels], [3, 3, 3])
                .with_stride([self.stride; 3])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .init(device),
        }
    }
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        leaky_relu(self.conv.forward(x), 0.2)
    }
}

/// Encoder/decoder with skip connections.
///
/// Each encoder level halves the resolution. The decoder arm runs one block
/// per encoder level, upsamples to the matching skip resolution and
/// concatenates the skip features; any remaining decoder features become
/// full-resolution refinement blocks.
#[derive(Module, Debug)]
pub struct Unet<B: Backend> {
    down: Vec<ConvBlock<B>>,
    up: Vec<ConvBlock<B>>,
    extras: Vec<ConvBlock<B>>,
    out_channels: usize,
}

#[derive(Config, Debug)]
pub struct UnetConfig {
    #[config(default = 2)]
    pub in_channels: usize,
    pub enc_features: Vec<usize>,
    pub dec_features: Vec<usize>,
}

impl UnetConfig {
    /// Decoder features must cover at least one block per encoder level.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Unet<B> {
        let levels = self.enc_features.len();

        let mut prev = self.in_channels;
        let mut skips = vec![prev];
        let mut down = Vec::with_capacity(levels);
        for &nf in &self.enc_features {
            down.push(ConvBlockConfig::new(prev, nf).with_stride(2).init(device));
            prev = nf;
            skips.push(nf);
        }
        // The deepest encoder output is the decoder input, not a skip.
        skips.pop();

        let mut up = Vec::with_capacity(levels);
        for &nf in self.dec_features.iter().take(levels) {
            up.push(ConvBlockConfig::new(prev, nf).init(device));
            prev = nf + skips.pop().unwrap_or(0);
        }

        let mut extras = Vec::new();
        for &nf in self.dec_features.iter().skip(levels) {
            extras.push(ConvBlockConfig::new(prev, nf).init(device));
            prev = nf;
        }

        Unet {
            down,
            up,
            extras,
            out_channels: prev,
        }
    }
}

impl<B: Backend> Unet<B> {
    /// Channel count of the final feature map.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut x = x;
        let mut skips = Vec::with_capacity(self.down.len());
        for block in &self.down {
            let next = block.forward(x.clone());
            skips.push(x);
            x = next;
        }

        for block in &self.up {
            x = block.forward(x);
            if let Some(skip) = skips.pop() {
                let [_, _, d, h, w] = skip.dims();
                x = Tensor::cat(vec![resize(x, [d, h, w]), skip], 1);
            }
        }

        for block in &self.extras {
            x = block.forward(x);
        }
        x
    }
}
