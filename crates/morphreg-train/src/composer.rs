//! Composition of similarity and smoothness terms into one objective.

use crate::config::TrainConfig;
use crate::error::{Result, TrainError};
use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use morphreg_model::losses::{FlowRegularizer, GradLoss, LocalNccLoss, MseLoss, Penalty, SimilarityLoss};
use morphreg_model::Prediction;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityKind {
    Ncc,
    Mse,
}

impl SimilarityKind {
    pub const NAMES: [&'static str; 2] = ["ncc", "mse"];
}

impl FromStr for SimilarityKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ncc" => Ok(Self::Ncc),
            "mse" => Ok(Self::Mse),
            other => Err(TrainError::configuration(format!(
                "image loss should be one of {:?}, but found \"{}\"",
                Self::NAMES,
                other
            ))),
        }
    }
}

impl fmt::Display for SimilarityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ncc => write!(f, "ncc"),
            Self::Mse => write!(f, "mse"),
        }
    }
}

/// One term of the objective and the slot it reads.
pub enum LossTerm<B: Backend> {
    /// Compares `targets[index]` with `prediction.warped[index]`.
    Similarity {
        name: &'static str,
        index: usize,
        loss: Box<dyn SimilarityLoss<B>>,
    },
    /// Penalizes `prediction.flow`; it has no target.
    Regularizer {
        name: &'static str,
        loss: Box<dyn FlowRegularizer<B>>,
    },
}

impl<B: Backend> LossTerm<B> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Similarity { name, .. } | Self::Regularizer { name, .. } => name,
        }
    }
}

impl<B: Backend> fmt::Debug for LossTerm<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Similarity { name, index, loss } => f
                .debug_struct("Similarity")
                .field("name", name)
                .field("index", index)
                .field("kind", &loss.name())
                .finish(),
            Self::Regularizer { name, loss } => f
                .debug_struct("Regularizer")
                .field("name", name)
                .field("kind", &loss.name())
                .finish(),
        }
    }
}

/// Target volumes aligned positionally with [`Prediction::warped`]:
/// `[fixed]`, or `[fixed, moving]` when bidirectional.
#[derive(Debug, Clone)]
pub struct Targets<B: Backend> {
    volumes: Vec<Tensor<B, 5>>,
}

impl<B: Backend> Targets<B> {
    pub fn assemble(moving: Tensor<B, 5>, fixed: Tensor<B, 5>, bidir: bool) -> Self {
        let volumes = if bidir { vec![fixed, moving] } else { vec![fixed] };
        Self { volumes }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor<B, 5>> {
        self.volumes.get(index)
    }
}

/// Result of one composition.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    /// Weighted sum, the tensor to back-propagate.
    pub total: Tensor<B, 1>,
    /// Host copy of `total`.
    pub total_value: f64,
    /// Per-term values before weighting, in term order.
    pub raw: Vec<f64>,
    /// Per-term values after weighting, in term order.
    pub weighted: Vec<f64>,
}

/// Ordered loss terms and their weights, fixed at construction.
///
/// Unidirectional: `[sim, grad]` weighted `[1, alpha]`.
/// Bidirectional: `[sim, bisim, grad]` weighted `[0.5, 0.5, alpha]`.
#[derive(Debug)]
pub struct LossComposer<B: Backend> {
    losses: Vec<LossTerm<B>>,
    weights: Vec<f64>,
    bidir: bool,
}

impl<B: Backend> LossComposer<B> {
    /// Fails with [`TrainError::Configuration`] for an unknown `sim_loss`.
    pub fn new(sim_loss: &str, bidir: bool, alpha: f64, win_size: usize, grad_loss_mult: f64) -> Result<Self> {
        let kind: SimilarityKind = sim_loss.parse()?;
        let similarity = |index: usize, name: &'static str| -> LossTerm<B> {
            let loss: Box<dyn SimilarityLoss<B>> = match kind {
                SimilarityKind::Ncc => Box::new(LocalNccLoss::new(win_size)),
                SimilarityKind::Mse => Box::new(MseLoss::new()),
            };
            LossTerm::Similarity { name, index, loss }
        };

        let (mut losses, mut weights) = if bidir {
            (vec![similarity(0, "sim"), similarity(1, "bisim")], vec![0.5, 0.5])
        } else {
            (vec![similarity(0, "sim")], vec![1.0])
        };

        losses.push(LossTerm::Regularizer {
            name: "grad",
            loss: Box::new(GradLoss::new(Penalty::L2, grad_loss_mult as f32)),
        });
        weights.push(alpha);

        tracing::debug!(%kind, bidir, ?weights, "Built loss composer");
        Ok(Self { losses, weights, bidir })
    }

    pub fn from_config(config: &TrainConfig) -> Result<Self> {
        Self::new(
            &config.sim_loss,
            config.bidir,
            config.alpha,
            config.win_size,
            config.grad_loss_mult,
        )
    }

    pub fn bidir(&self) -> bool {
        self.bidir
    }

    pub fn losses(&self) -> &[LossTerm<B>] {
        &self.losses
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn term_names(&self) -> Vec<&'static str> {
        self.losses.iter().map(LossTerm::name).collect()
    }

    /// Weighted sum of every term plus the per-term breakdown.
    pub fn compute(&self, targets: &Targets<B>, prediction: &Prediction<B>) -> Result<LossBreakdown<B>> {
        if targets.len() != prediction.arity() {
            return Err(TrainError::ShapeMismatch {
                expected: vec![targets.len()],
                actual: vec![prediction.arity()],
            });
        }

        let mut total: Option<Tensor<B, 1>> = None;
        let mut raw = Vec::with_capacity(self.losses.len());
        let mut weighted = Vec::with_capacity(self.losses.len());

        for (term, &weight) in self.losses.iter().zip(&self.weights) {
            let value = match term {
                LossTerm::Similarity { index, loss, .. } => {
                    match (targets.get(*index), prediction.warped.get(*index)) {
                        (Some(target), Some(warped)) => loss.compute(target.clone(), warped.clone()),
                        _ => {
                            return Err(TrainError::ShapeMismatch {
                                expected: vec![*index + 1],
                                actual: vec![prediction.arity()],
                            })
                        }
                    }
                }
                LossTerm::Regularizer { loss, .. } => loss.compute(prediction.flow.clone()),
            };

            let raw_value = scalar(&value);
            let term_total = value.mul_scalar(weight);
            raw.push(raw_value);
            weighted.push(raw_value * weight);
            total = Some(match total {
                Some(sum) => sum + term_total,
                None => term_total,
            });
        }

        let total = total.ok_or_else(|| TrainError::configuration("loss composer has no terms"))?;
        let total_value = scalar(&total);
        Ok(LossBreakdown {
            total,
            total_value,
            raw,
            weighted,
        })
    }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn volume(seed: usize) -> Tensor<B, 5> {
        let device = Default::default();
        let values: Vec<f32> = (0..125).map(|v| (((v + seed) * 13) % 17) as f32 / 17.0).collect();
        Tensor::from_data(TensorData::new(values, [1, 1, 5, 5, 5]), &device)
    }

    fn flow() -> Tensor<B, 5> {
        let device = Default::default();
        let values: Vec<f32> = (0..3 * 27).map(|v| (v % 5) as f32 * 0.1).collect();
        Tensor::from_data(TensorData::new(values, [1, 3, 3, 3, 3]), &device)
    }

    fn prediction(bidir: bool) -> Prediction<B> {
        let warped = if bidir { vec![volume(1), volume(2)] } else { vec![volume(1)] };
        Prediction {
            warped,
            flow: flow(),
            displacement: flow(),
        }
    }

    #[test]
    fn test_bidirectional_layout() {
        let composer = LossComposer::<B>::new("ncc", true, 0.3, 3, 2.0).unwrap();
        assert_eq!(composer.losses().len(), composer.weights().len());
        assert_eq!(composer.weights(), &[0.5, 0.5, 0.3]);
        assert_eq!(composer.term_names(), vec!["sim", "bisim", "grad"]);
    }

    #[test]
    fn test_unidirectional_layout() {
        let composer = LossComposer::<B>::new("mse", false, 0.3, 3, 2.0).unwrap();
        assert_eq!(composer.losses().len(), composer.weights().len());
        assert_eq!(composer.weights(), &[1.0, 0.3]);
        assert_eq!(composer.term_names(), vec!["sim", "grad"]);
    }

    #[test]
    fn test_unknown_kind_fails_fast() {
        let err = LossComposer::<B>::new("dice", false, 1.0, 9, 2.0).unwrap_err();
        assert!(matches!(err, TrainError::Configuration(_)));
        let msg = err.to_string();
        assert!(msg.contains("dice"));
        assert!(msg.contains("ncc") && msg.contains("mse"));
    }

    #[test]
    fn test_total_is_weighted_sum() {
        let composer = LossComposer::<B>::new("ncc", true, 0.7, 3, 2.0).unwrap();
        let targets = Targets::assemble(volume(3), volume(4), true);
        let out = composer.compute(&targets, &prediction(true)).unwrap();
        assert_eq!(out.raw.len(), 3);
        assert_eq!(out.weighted.len(), 3);

        let [a, b, c] = [out.raw[0], out.raw[1], out.raw[2]];
        let expected = 0.5 * a + 0.5 * b + 0.7 * c;
        assert!((out.total_value - expected).abs() < 1e-5);
        let summed: f64 = out.weighted.iter().sum();
        assert!((out.total_value - summed).abs() < 1e-5);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let composer = LossComposer::<B>::new("mse", false, 1.0, 3, 2.0).unwrap();
        let targets = Targets::assemble(volume(3), volume(4), false);
        let pred = prediction(false);
        let first = composer.compute(&targets, &pred).unwrap();
        let second = composer.compute(&targets, &pred).unwrap();
        assert_eq!(first.total_value, second.total_value);
        assert_eq!(first.raw, second.raw);
        assert_eq!(first.weighted, second.weighted);
    }

    #[test]
    fn test_targets_order() {
        let moving = volume(0);
        let fixed = volume(5);
        let targets = Targets::assemble(moving.clone(), fixed.clone(), true);
        assert_eq!(targets.len(), 2);
        let first: f32 = (targets.get(0).unwrap().clone() - fixed).abs().sum().into_scalar();
        let second: f32 = (targets.get(1).unwrap().clone() - moving).abs().sum().into_scalar();
        assert_eq!(first, 0.0);
        assert_eq!(second, 0.0);
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let composer = LossComposer::<B>::new("mse", true, 1.0, 3, 2.0).unwrap();
        let targets = Targets::assemble(volume(3), volume(4), true);
        let err = composer.compute(&targets, &prediction(false)).unwrap_err();
        assert!(matches!(err, TrainError::ShapeMismatch { .. }));
    }
}
