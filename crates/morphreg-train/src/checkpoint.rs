//! Best-checkpoint selection and persistence.

use crate::error::{Result, TrainError};
use crate::evaluation::EvalMetrics;
use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Strict-improvement policy over the evaluation TRE.
///
/// A result is accepted only when `tre < best` and `best - tre > margin`.
/// The best value starts at `+inf`, so the first finite result is always
/// accepted; `NaN` is never accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointSelector {
    best: f64,
    margin: f64,
}

impl CheckpointSelector {
    pub fn new(margin: f64) -> Self {
        Self {
            best: f64::INFINITY,
            margin,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Returns `true` and records `tre` as the new best when accepted.
    pub fn consider(&mut self, tre: f64) -> bool {
        if tre < self.best && self.best - tre > self.margin {
            self.best = tre;
            true
        } else {
            false
        }
    }
}

impl Default for CheckpointSelector {
    fn default() -> Self {
        Self::new(0.01)
    }
}

/// Metadata stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    /// Run start timestamp, the checkpoint namespace.
    pub timestamp: String,
    pub metrics: EvalMetrics,
}

/// Snapshot handed to a [`CheckpointWriter`].
pub struct Checkpoint<'a, M, O> {
    pub model: &'a M,
    pub optimizer: &'a O,
    pub meta: CheckpointMeta,
}

/// Persists accepted checkpoints. Written checkpoints are never revisited.
pub trait CheckpointWriter<B: AutodiffBackend, M: AutodiffModule<B>, O: Optimizer<M, B>> {
    /// Returns the location of the written checkpoint.
    fn write(&mut self, checkpoint: &Checkpoint<'_, M, O>) -> Result<PathBuf>;
}

/// Writes `root/<timestamp>/epoch_<k>/{model.mpk, optimizer.mpk, meta.json}`.
#[derive(Debug, Clone)]
pub struct FileCheckpointWriter {
    root: PathBuf,
}

impl FileCheckpointWriter {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn checkpoint_dir(&self, meta: &CheckpointMeta) -> PathBuf {
        self.root
            .join(&meta.timestamp)
            .join(format!("epoch_{}", meta.epoch))
    }
}

impl<B, M, O> CheckpointWriter<B, M, O> for FileCheckpointWriter
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn write(&mut self, checkpoint: &Checkpoint<'_, M, O>) -> Result<PathBuf> {
        let meta = &checkpoint.meta;
        let dir = self.checkpoint_dir(meta);
        std::fs::create_dir_all(&dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

        checkpoint
            .model
            .clone()
            .save_file(dir.join("model"), &recorder)
            .map_err(|e| TrainError::checkpoint(format!("failed to save model at epoch {}: {}", meta.epoch, e)))?;

        recorder
            .record(checkpoint.optimizer.to_record(), dir.join("optimizer"))
            .map_err(|e| TrainError::checkpoint(format!("failed to save optimizer at epoch {}: {}", meta.epoch, e)))?;

        serde_json::to_writer_pretty(std::fs::File::create(dir.join("meta.json"))?, meta)
            .map_err(|e| TrainError::checkpoint(format!("failed to write meta.json: {}", e)))?;

        tracing::info!(epoch = meta.epoch, path = %dir.display(), "Checkpoint saved (model + optimizer + meta)");
        Ok(dir)
    }
}

/// Load model weights from a checkpoint directory into `model`.
pub fn load_model_checkpoint<B: Backend, M: Module<B>>(model: M, dir: &Path, device: &B::Device) -> Result<M> {
    model
        .load_file(
            dir.join("model"),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| TrainError::checkpoint(format!("failed to load checkpoint from {}: {}", dir.display(), e)))
}

/// Read the metadata of a checkpoint directory.
pub fn read_checkpoint_meta(dir: &Path) -> Result<CheckpointMeta> {
    let file = std::fs::File::open(dir.join("meta.json"))?;
    serde_json::from_reader(file)
        .map_err(|e| TrainError::checkpoint(format!("invalid meta.json in {}: {}", dir.display(), e)))
}
