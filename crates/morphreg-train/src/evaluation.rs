//! Held-out evaluation: landmark TRE and reconstruction error.

use crate::dataset::{LandmarkPair, LandmarkPairDataset};
use crate::error::{Result, TrainError};
use burn::tensor::{backend::Backend, ElementConversion};
use morphreg_core::{DisplacementField, DisplacementStats};
use morphreg_model::RegistrationModel;
use serde::{Deserialize, Serialize};

/// Metrics of one held-out pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleMetrics {
    /// Mean landmark error in physical units.
    pub tre: f64,
    /// Population standard deviation of the landmark errors.
    pub tre_std: f64,
    /// Mean squared intensity difference of warped moving and fixed.
    pub mse: f64,
}

/// Column-wise mean of [`SampleMetrics`] over the held-out set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub tre: f64,
    pub tre_std: f64,
    pub mse: f64,
}

/// Column-wise arithmetic mean. An empty list yields `NaN` everywhere.
pub fn reduce(samples: &[SampleMetrics]) -> EvalMetrics {
    if samples.is_empty() {
        return EvalMetrics {
            tre: f64::NAN,
            tre_std: f64::NAN,
            mse: f64::NAN,
        };
    }
    let n = samples.len() as f64;
    let (tre, tre_std, mse) = samples.iter().fold((0.0, 0.0, 0.0), |acc, s| {
        (acc.0 + s.tre, acc.1 + s.tre_std, acc.2 + s.mse)
    });
    EvalMetrics {
        tre: tre / n,
        tre_std: tre_std / n,
        mse: mse / n,
    }
}

/// Register one pair and score it against its landmarks.
///
/// The predicted displacement is sampled at every fixed landmark; the error
/// of a landmark is the physical distance between the displaced fixed point
/// and its moving counterpart, using the fixed volume's spacing.
pub fn evaluate_sample<B: Backend, M: RegistrationModel<B>>(model: &M, sample: &LandmarkPair<B>) -> Result<SampleMetrics> {
    let fixed = sample.pair.fixed.to_batch();
    let moving = sample.pair.moving.to_batch();
    let prediction = model.forward(moving, fixed.clone());

    let warped = prediction.warped_moving().ok_or_else(|| TrainError::ShapeMismatch {
        expected: vec![1],
        actual: vec![prediction.arity()],
    })?;
    let mse = (warped.clone() - fixed)
        .powf_scalar(2.0)
        .mean()
        .into_scalar()
        .elem::<f64>();

    let field = DisplacementField::from_tensor(prediction.displacement)
        .map_err(|e| TrainError::data(format!("{}: {}", sample.pair.id, e)))?;
    let displacements = field.sample_points(sample.landmarks.fixed());
    let errors = sample
        .landmarks
        .displacement_errors(&displacements, sample.pair.fixed.spacing());
    let stats = DisplacementStats::from_errors(&errors);

    Ok(SampleMetrics {
        tre: stats.mean,
        tre_std: stats.std,
        mse,
    })
}

/// Evaluate every held-out pair in dataset order.
///
/// Any unreadable pair or landmark file aborts the evaluation.
pub fn evaluate<B, M, D>(model: &M, dataset: &D) -> Result<(Vec<SampleMetrics>, EvalMetrics)>
where
    B: Backend,
    M: RegistrationModel<B>,
    D: LandmarkPairDataset<B>,
{
    if dataset.is_empty() {
        return Err(TrainError::data("held-out set is empty"));
    }
    let mut samples = Vec::with_capacity(dataset.len());
    for index in 0..dataset.len() {
        let sample = dataset.get(index)?;
        let metrics = evaluate_sample(model, &sample)?;
        tracing::debug!(
            id = %sample.pair.id,
            tre = metrics.tre,
            tre_std = metrics.tre_std,
            mse = metrics.mse,
            "Evaluated held-out pair"
        );
        samples.push(metrics);
    }
    let summary = reduce(&samples);
    Ok((samples, summary))
}
