//! Structured training records and the callbacks that receive them.

use crate::checkpoint::CheckpointMeta;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Diagnostic entry of one optimizer step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    /// 1-based epoch.
    pub epoch: usize,
    /// 0-based step within the epoch.
    pub step: usize,
    pub num_steps: usize,
    pub loss: f64,
    /// Weighted per-term losses, in composer order.
    pub components: Vec<(&'static str, f64)>,
    pub sample_id: String,
}

/// Epoch summary: mean train loss and the evaluation reductions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub tre: f64,
    pub tre_std: f64,
    pub mse: f64,
}

/// Receiver of training records. Every hook defaults to a no-op.
pub trait TrainingCallback {
    fn on_start(&self, _num_train: usize, _num_epochs: usize) {}

    fn on_step(&self, _record: &StepRecord) {}

    fn on_epoch(&self, _metrics: &EpochMetrics) {}

    /// An accepted checkpoint, with the metrics that justified it.
    fn on_checkpoint(&self, _meta: &CheckpointMeta, _path: &Path) {}

    fn on_complete(&self, _best_tre: f64) {}

    fn on_error(&self, _error: &str) {}
}

/// Emits every record as a `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct TracingCallback;

impl TrainingCallback for TracingCallback {
    fn on_start(&self, num_train: usize, num_epochs: usize) {
        tracing::info!("Training started: {} pairs, {} epochs", num_train, num_epochs);
    }

    fn on_step(&self, record: &StepRecord) {
        tracing::info!("img_name:{}", record.sample_id);
        let components: Vec<String> = record
            .components
            .iter()
            .map(|(name, value)| format!("{}: {:.5}", name, value))
            .collect();
        tracing::info!(
            "iter: {} batch: {}  loss: {:.5}  {}",
            record.epoch,
            record.step,
            record.loss,
            components.join("  ")
        );
    }

    fn on_epoch(&self, metrics: &EpochMetrics) {
        tracing::info!("{}", epoch_summary(metrics));
    }

    fn on_checkpoint(&self, meta: &CheckpointMeta, path: &Path) {
        let metrics = &meta.metrics;
        tracing::info!(
            "best tre {:.5}+-{:.5}, mse {:.5} at iter {} saved to {}",
            metrics.tre,
            metrics.tre_std,
            metrics.mse,
            meta.epoch,
            path.display()
        );
    }

    fn on_complete(&self, best_tre: f64) {
        tracing::info!("Training completed, best tre: {:.5}", best_tre);
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Training failed: {}", error);
    }
}

/// Prints the one-line epoch summary to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleCallback;

impl TrainingCallback for ConsoleCallback {
    fn on_start(&self, num_train: usize, _num_epochs: usize) {
        println!("Number of training images: {}", num_train);
    }

    fn on_epoch(&self, metrics: &EpochMetrics) {
        println!("{}", epoch_summary(metrics));
    }
}

/// `iter: i, mean train loss:x, test tre:t+-s, test mse:m`
pub fn epoch_summary(metrics: &EpochMetrics) -> String {
    format!(
        "iter: {}, mean train loss:{:2.5}, test tre:{:2.5}+-{:2.5}, test mse:{:2.5}",
        metrics.epoch, metrics.train_loss, metrics.tre, metrics.tre_std, metrics.mse
    )
}

#[derive(Debug, Default)]
struct History {
    started: usize,
    steps: Vec<StepRecord>,
    epochs: Vec<EpochMetrics>,
    checkpoints: Vec<(CheckpointMeta, PathBuf)>,
    completed: Option<f64>,
    errors: Vec<String>,
}

/// Records everything it receives; clones share one history.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<History>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn starts(&self) -> usize {
        self.lock().started
    }

    pub fn steps(&self) -> Vec<StepRecord> {
        self.lock().steps.clone()
    }

    pub fn epochs(&self) -> Vec<EpochMetrics> {
        self.lock().epochs.clone()
    }

    pub fn checkpoints(&self) -> Vec<(CheckpointMeta, PathBuf)> {
        self.lock().checkpoints.clone()
    }

    pub fn completed(&self) -> Option<f64> {
        self.lock().completed
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    pub fn is_empty(&self) -> bool {
        let history = self.lock();
        history.started == 0
            && history.steps.is_empty()
            && history.epochs.is_empty()
            && history.checkpoints.is_empty()
            && history.completed.is_none()
            && history.errors.is_empty()
    }
}

impl TrainingCallback for HistoryCallback {
    fn on_start(&self, _num_train: usize, _num_epochs: usize) {
        self.lock().started += 1;
    }

    fn on_step(&self, record: &StepRecord) {
        self.lock().steps.push(record.clone());
    }

    fn on_epoch(&self, metrics: &EpochMetrics) {
        self.lock().epochs.push(*metrics);
    }

    fn on_checkpoint(&self, meta: &CheckpointMeta, path: &Path) {
        self.lock().checkpoints.push((meta.clone(), path.to_path_buf()));
    }

    fn on_complete(&self, best_tre: f64) {
        self.lock().completed = Some(best_tre);
    }

    fn on_error(&self, error: &str) {
        self.lock().errors.push(error.to_string());
    }
}

/// Fans every record out to several callbacks, in insertion order.
#[derive(Default)]
pub struct CallbackSet {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<C: TrainingCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn push<C: TrainingCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet").field("len", &self.callbacks.len()).finish()
    }
}

impl TrainingCallback for CallbackSet {
    fn on_start(&self, num_train: usize, num_epochs: usize) {
        self.callbacks.iter().for_each(|c| c.on_start(num_train, num_epochs));
    }

    fn on_step(&self, record: &StepRecord) {
        self.callbacks.iter().for_each(|c| c.on_step(record));
    }

    fn on_epoch(&self, metrics: &EpochMetrics) {
        self.callbacks.iter().for_each(|c| c.on_epoch(metrics));
    }

    fn on_checkpoint(&self, meta: &CheckpointMeta, path: &Path) {
        self.callbacks.iter().for_each(|c| c.on_checkpoint(meta, path));
    }

    fn on_complete(&self, best_tre: f64) {
        self.callbacks.iter().for_each(|c| c.on_complete(best_tre));
    }

    fn on_error(&self, error: &str) {
        self.callbacks.iter().for_each(|c| c.on_error(error));
    }
}
