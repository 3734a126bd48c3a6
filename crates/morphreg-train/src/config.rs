//! Run configuration.
//!
//! Sources, lowest to highest priority: [`TrainConfig::default`], an optional
//! TOML file, then command-line flags applied by the binary.

use crate::error::{Result, TrainError};
use morphreg_model::VxmDenseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Devices the binary can run on.
pub const KNOWN_DEVICES: [&str; 2] = ["cpu", "wgpu"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub device: String,
    /// Split root containing `fixed/` and `moving/`.
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    /// Landmark files paired with the sorted test pairs.
    pub landmark_dir: PathBuf,
    pub batch_size: usize,
    pub lr: f64,
    /// Number of epochs.
    pub n_iter: usize,
    /// Similarity kind, `"ncc"` or `"mse"`.
    pub sim_loss: String,
    /// Weight of the smoothness term.
    pub alpha: f64,
    pub bidir: bool,
    /// Local NCC window edge length.
    pub win_size: usize,
    pub model_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub seed: u64,
    /// Minimum TRE improvement required to accept a new checkpoint.
    pub margin: f64,
    pub grad_loss_mult: f64,
    pub int_steps: usize,
    pub int_downsize: usize,
    pub enc_features: Vec<usize>,
    pub dec_features: Vec<usize>,
    /// Show a progress bar on stderr.
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            train_dir: PathBuf::from("data/train"),
            test_dir: PathBuf::from("data/test"),
            landmark_dir: PathBuf::from("data/landmarks"),
            batch_size: 1,
            lr: 1e-4,
            n_iter: 100,
            sim_loss: "ncc".to_string(),
            alpha: 1.0,
            bidir: false,
            win_size: 9,
            model_dir: PathBuf::from("Checkpoint"),
            log_dir: PathBuf::from("Log"),
            output_dir: PathBuf::from("Result"),
            seed: 42,
            margin: 0.01,
            grad_loss_mult: 2.0,
            int_steps: 7,
            int_downsize: 2,
            enc_features: vec![16, 32, 32, 32],
            dec_features: vec![32, 32, 32, 32, 32, 16, 16],
            progress: true,
        }
    }
}

impl TrainConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TrainError::configuration(format!("invalid TOML: {}", e)))
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "Loaded training config");
        Ok(config)
    }

    /// Check numeric ranges and the device name.
    ///
    /// The similarity kind is checked when the loss composer is built.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrainError::configuration("batch_size must be positive"));
        }
        if self.n_iter == 0 {
            return Err(TrainError::configuration("n_iter must be positive"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainError::configuration(format!(
                "lr must be positive and finite, got {}",
                self.lr
            )));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(TrainError::configuration(format!(
                "alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if self.win_size == 0 || self.win_size % 2 == 0 {
            return Err(TrainError::configuration(format!(
                "win_size must be odd, got {}",
                self.win_size
            )));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(TrainError::configuration(format!(
                "margin must be non-negative, got {}",
                self.margin
            )));
        }
        if self.enc_features.is_empty() || self.dec_features.len() < self.enc_features.len() {
            return Err(TrainError::configuration(
                "dec_features needs at least one entry per encoder level",
            ));
        }
        if !KNOWN_DEVICES.contains(&self.device.as_str()) {
            return Err(TrainError::configuration(format!(
                "unknown device '{}', expected one of {:?}",
                self.device, KNOWN_DEVICES
            )));
        }
        Ok(())
    }

    /// Network architecture derived from this configuration.
    pub fn model_config(&self) -> VxmDenseConfig {
        VxmDenseConfig::new()
            .with_enc_features(self.enc_features.clone())
            .with_dec_features(self.dec_features.clone())
            .with_int_steps(self.int_steps)
            .with_int_downsize(self.int_downsize)
            .with_bidir(self.bidir)
    }
}
