use super::trait_::FlowRegularizer;
use burn::tensor::{backend::Backend, Tensor};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    L1,
    L2,
}

impl FromStr for Penalty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            other => Err(format!("unknown penalty '{}', expected one of [l1, l2]", other)),
        }
    }
}

/// Gradient loss for smoothness regularization.
///
/// Penalizes forward finite differences of the field along each spatial
/// axis, averaged over the three axes and scaled by `loss_mult`.
#[derive(Debug, Clone)]
pub struct GradLoss {
    penalty: Penalty,
    loss_mult: f32,
}

impl GradLoss {
    pub fn new(penalty: Penalty, loss_mult: f32) -> Self {
        Self { penalty, loss_mult }
    }

    pub fn penalty(&self) -> Penalty {
        self.penalty
    }
}

impl Default for GradLoss {
    fn default() -> Self {
        Self::new(Penalty::L2, 1.0)
    }
}

impl<B: Backend> FlowRegularizer<B> for GradLoss {
    fn compute(&self, flow: Tensor<B, 5>) -> Tensor<B, 1> {
        let [b, c, d, h, w] = flow.dims();
        let device = flow.device();

        let dz = (d > 1).then(|| {
            flow.clone().slice([0..b, 0..c, 1..d, 0..h, 0..w])
                - flow.clone().slice([0..b, 0..c, 0..d - 1, 0..h, 0..w])
        });
        let dy = (h > 1).then(|| {
            flow.clone().slice([0..b, 0..c, 0..d, 1..h, 0..w])
                - flow.clone().slice([0..b, 0..c, 0..d, 0..h - 1, 0..w])
        });
        let dx = (w > 1).then(|| {
            flow.clone().slice([0..b, 0..c, 0..d, 0..h, 1..w])
                - flow.clone().slice([0..b, 0..c, 0..d, 0..h, 0..w - 1])
        });

        let penalty = self.penalty;
        let mut total = Tensor::<B, 1>::zeros([1], &device);
        // A singleton axis has no differences and contributes zero.
        for diff in [dz, dy, dx].into_iter().flatten() {
            let term = match penalty {
                Penalty::L1 => diff.abs(),
                Penalty::L2 => diff.powf_scalar(2.0),
            };
            total = total + term.mean();
        }

        total.div_scalar(3.0).mul_scalar(self.loss_mult)
    }

    fn name(&self) -> &'static str {
        "grad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_constant_field_has_zero_penalty() {
        let device = Default::default();
        let flow = Tensor::<B, 5>::ones([1, 3, 4, 4, 4], &device).mul_scalar(2.5);
        let loss: f32 = FlowRegularizer::<B>::compute(&GradLoss::default(), flow).into_scalar();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_linear_ramp_along_x() {
        let device = Default::default();
        // Value equals 2x on every channel: dx = 2, dy = dz = 0.
        let values: Vec<f32> = (0..3 * 8).map(|i| 2.0 * (i % 2) as f32).collect();
        let flow = Tensor::<B, 5>::from_data(TensorData::new(values, [1, 3, 2, 2, 2]), &device);

        let l2: f32 = FlowRegularizer::<B>::compute(&GradLoss::new(Penalty::L2, 1.0), flow.clone())
            .into_scalar();
        assert!((l2 - 4.0 / 3.0).abs() < 1e-6);

        let l1: f32 = FlowRegularizer::<B>::compute(&GradLoss::new(Penalty::L1, 2.0), flow)
            .into_scalar();
        assert!((l1 - 2.0 * 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_penalty_parse() {
        assert_eq!("l1".parse::<Penalty>(), Ok(Penalty::L1));
        assert!("l3".parse::<Penalty>().is_err());
    }
}
