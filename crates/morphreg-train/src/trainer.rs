//! The epoch loop: train steps, held-out evaluation, checkpoint selection.

use crate::checkpoint::{Checkpoint, CheckpointMeta, CheckpointSelector, CheckpointWriter};
use crate::composer::{LossComposer, Targets};
use crate::config::TrainConfig;
use crate::dataset::{BatchLoader, LandmarkPairDataset, PairDataset};
use crate::error::{Result, TrainError};
use crate::evaluation::evaluate;
use crate::progress::{CallbackSet, EpochMetrics, StepRecord, TrainingCallback};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use morphreg_model::RegistrationModel;
use std::path::PathBuf;

/// Mutable run state, owned by the [`Trainer`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// Best accepted TRE; non-increasing over the run.
    pub best_tre: f64,
    /// `%Y-%m-%d-%H-%M-%S` at construction, the checkpoint namespace.
    pub run_timestamp: String,
    pub epoch: usize,
    pub step: usize,
}

impl TrainingState {
    fn new(run_timestamp: String) -> Self {
        Self {
            best_tre: f64::INFINITY,
            run_timestamp,
            epoch: 0,
            step: 0,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
    pub best_tre: f64,
    pub checkpoints: Vec<PathBuf>,
    pub run_timestamp: String,
}

/// Owns the loss composer, the checkpoint policy and the run state.
///
/// Construction validates the configuration and builds the composer, so an
/// invalid configuration fails before any data is touched.
pub struct Trainer<B: AutodiffBackend> {
    config: TrainConfig,
    composer: LossComposer<B>,
    selector: CheckpointSelector,
    callbacks: CallbackSet,
    state: TrainingState,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainConfig, callbacks: CallbackSet) -> Result<Self> {
        config.validate()?;
        let composer = LossComposer::from_config(&config)?;
        let selector = CheckpointSelector::new(config.margin);
        let timestamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        Ok(Self {
            config,
            composer,
            selector,
            callbacks,
            state: TrainingState::new(timestamp),
        })
    }

    /// Override the run timestamp used to namespace checkpoints.
    pub fn with_run_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.state.run_timestamp = timestamp.into();
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn composer(&self) -> &LossComposer<B> {
        &self.composer
    }

    pub fn selector(&self) -> &CheckpointSelector {
        &self.selector
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Train for `n_iter` epochs, evaluating and considering a checkpoint
    /// after each one.
    ///
    /// Any error aborts the whole run; checkpoints already written remain.
    pub fn fit<M, O, D, E, W>(
        &mut self,
        model: M,
        optimizer: O,
        train: &D,
        eval: &E,
        writer: &mut W,
    ) -> Result<(M, TrainingReport)>
    where
        M: AutodiffModule<B> + RegistrationModel<B>,
        M::InnerModule: RegistrationModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        D: PairDataset<B>,
        E: LandmarkPairDataset<B::InnerBackend>,
        W: CheckpointWriter<B, M, O>,
    {
        let result = self.run(model, optimizer, train, eval, writer);
        if let Err(err) = &result {
            self.callbacks.on_error(&err.to_string());
        }
        result
    }

    fn run<M, O, D, E, W>(
        &mut self,
        model: M,
        mut optimizer: O,
        train: &D,
        eval: &E,
        writer: &mut W,
    ) -> Result<(M, TrainingReport)>
    where
        M: AutodiffModule<B> + RegistrationModel<B>,
        M::InnerModule: RegistrationModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        D: PairDataset<B>,
        E: LandmarkPairDataset<B::InnerBackend>,
        W: CheckpointWriter<B, M, O>,
    {
        if model.bidir() != self.composer.bidir() {
            return Err(TrainError::configuration(format!(
                "model bidir = {} but loss composer bidir = {}",
                model.bidir(),
                self.composer.bidir()
            )));
        }
        if train.is_empty() {
            return Err(TrainError::data("training set is empty"));
        }

        let mut model = model;
        let mut loader = BatchLoader::new(self.config.batch_size, true, self.config.seed);
        let names = self.composer.term_names();
        let mut report = TrainingReport {
            epochs: Vec::with_capacity(self.config.n_iter),
            best_tre: self.selector.best(),
            checkpoints: Vec::new(),
            run_timestamp: self.state.run_timestamp.clone(),
        };

        self.callbacks.on_start(train.len(), self.config.n_iter);

        for epoch in 1..=self.config.n_iter {
            self.state.epoch = epoch;
            let order = loader.epoch_order(train.len());
            let bar = self.progress_bar(order.len());
            let mut losses = Vec::with_capacity(order.len());

            for (step, indices) in order.iter().enumerate() {
                self.state.step = step;
                let batch = loader.load(train, indices)?;

                let prediction = model.forward(batch.moving.clone(), batch.fixed.clone());
                let targets = Targets::assemble(batch.moving, batch.fixed, self.composer.bidir());
                let breakdown = self.composer.compute(&targets, &prediction)?;
                let loss = breakdown.total_value;
                if !loss.is_finite() {
                    return Err(TrainError::numerical_instability(format!(
                        "loss {} at iter {} batch {} ({})",
                        loss, epoch, step, batch.id
                    )));
                }

                self.callbacks.on_step(&StepRecord {
                    epoch,
                    step,
                    num_steps: order.len(),
                    loss,
                    components: names.iter().copied().zip(breakdown.weighted.iter().copied()).collect(),
                    sample_id: batch.id,
                });
                bar.set_message(format!("Training ({} / {} Steps) (loss={:2.5})", step, order.len(), loss));
                bar.inc(1);

                let grads = GradientsParams::from_grads(breakdown.total.backward(), &model);
                model = optimizer.step(self.config.lr, model, grads);
                losses.push(loss);
            }
            bar.finish_and_clear();

            let train_loss = losses.iter().sum::<f64>() / losses.len() as f64;
            let (_, summary) = evaluate::<B::InnerBackend, _, _>(&model.valid(), eval)?;
            if !summary.tre.is_finite() {
                tracing::warn!(epoch, tre = summary.tre, "Non-finite evaluation TRE, checkpoint skipped");
            }

            if self.selector.consider(summary.tre) {
                self.state.best_tre = self.selector.best();
                let checkpoint = Checkpoint {
                    model: &model,
                    optimizer: &optimizer,
                    meta: CheckpointMeta {
                        epoch,
                        timestamp: self.state.run_timestamp.clone(),
                        metrics: summary,
                    },
                };
                let path = writer.write(&checkpoint)?;
                self.callbacks.on_checkpoint(&checkpoint.meta, &path);
                report.checkpoints.push(path);
            }

            let metrics = EpochMetrics {
                epoch,
                train_loss,
                tre: summary.tre,
                tre_std: summary.tre_std,
                mse: summary.mse,
            };
            self.callbacks.on_epoch(&metrics);
            report.epochs.push(metrics);
        }

        report.best_tre = self.selector.best();
        self.callbacks.on_complete(report.best_tre);
        Ok((model, report))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}

impl<B: AutodiffBackend> std::fmt::Debug for Trainer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("composer", &self.composer)
            .field("selector", &self.selector)
            .field("state", &self.state)
            .finish()
    }
}
