use super::trait_::SimilarityLoss;
use burn::tensor::{
    backend::Backend,
    module::conv3d,
    ops::ConvOptions,
    Tensor,
};

/// Local normalized cross correlation over a cubic sliding window.
///
/// Perfectly correlated windows give `cc = 1`; the loss is `-mean(cc)`.
#[derive(Debug, Clone)]
pub struct LocalNccLoss {
    window_size: usize,
    epsilon: f32,
}

impl LocalNccLoss {
    /// # Arguments
    /// * `window_size` - Edge length of the window (odd, usually 9)
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            epsilon: 1e-5,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn window_mean<B: Backend>(&self, x: Tensor<B, 5>, weight: Tensor<B, 5>) -> Tensor<B, 5> {
        let pad = self.window_size / 2;
        conv3d(
            x,
            weight,
            None,
            ConvOptions::new([1, 1, 1], [pad, pad, pad], [1, 1, 1], 1),
        )
    }
}

impl Default for LocalNccLoss {
    fn default() -> Self {
        Self::new(9)
    }
}

impl<B: Backend> SimilarityLoss<B> for LocalNccLoss {
    fn compute(&self, target: Tensor<B, 5>, prediction: Tensor<B, 5>) -> Tensor<B, 1> {
        let [b, c, d, h, w] = target.dims();
        // Channels are correlated independently.
        let i = target.reshape([b * c, 1, d, h, w]);
        let j = prediction.reshape([b * c, 1, d, h, w]);

        let ws = self.window_size;
        let n = (ws * ws * ws) as f32;
        let weight = Tensor::<B, 5>::ones([1, 1, ws, ws, ws], &i.device()).div_scalar(n);

        let i_mean = self.window_mean(i.clone(), weight.clone());
        let j_mean = self.window_mean(j.clone(), weight.clone());
        let i2_mean = self.window_mean(i.clone() * i.clone(), weight.clone());
        let j2_mean = self.window_mean(j.clone() * j.clone(), weight.clone());
        let ij_mean = self.window_mean(i * j, weight);

        let cross = ij_mean - i_mean.clone() * j_mean.clone();
        let i_var = i2_mean - i_mean.powf_scalar(2.0);
        let j_var = j2_mean - j_mean.powf_scalar(2.0);

        let cc = cross.clone() * cross / (i_var * j_var).add_scalar(self.epsilon);
        cc.mean().neg()
    }

    fn name(&self) -> &'static str {
        "ncc"
    }
}
