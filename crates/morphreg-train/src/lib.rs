//! Training and checkpoint selection for dense deformable registration.
//!
//! A [`Trainer`] owns the loss composition, the epoch loop and the
//! checkpoint policy. Model, datasets, optimizer and checkpoint storage are
//! injected, so every collaborator can be replaced by a test double.

pub mod error;
pub mod config;
pub mod dataset;
pub mod composer;
pub mod evaluation;
pub mod checkpoint;
pub mod progress;
pub mod trainer;
pub mod logging;

pub use error::{Result, TrainError};
pub use config::TrainConfig;
pub use dataset::{
    Batch, BatchLoader, ImagePair, InMemoryLandmarkDataset, InMemoryPairDataset, LandmarkPair,
    LandmarkPairDataset, NiftiLandmarkDataset, NiftiPairDataset, PairDataset,
};
pub use composer::{LossBreakdown, LossComposer, LossTerm, SimilarityKind, Targets};
pub use evaluation::{evaluate, evaluate_sample, reduce, EvalMetrics, SampleMetrics};
pub use checkpoint::{
    load_model_checkpoint, Checkpoint, CheckpointMeta, CheckpointSelector, CheckpointWriter,
    FileCheckpointWriter,
};
pub use progress::{
    CallbackSet, ConsoleCallback, EpochMetrics, HistoryCallback, StepRecord, TracingCallback,
    TrainingCallback,
};
pub use trainer::{Trainer, TrainingReport, TrainingState};
