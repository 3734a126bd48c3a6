use anyhow::{Context, Result};
use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use morphreg_model::VxmDense;
use morphreg_train::{
    logging, CallbackSet, ConsoleCallback, FileCheckpointWriter, NiftiLandmarkDataset,
    NiftiPairDataset, TracingCallback, TrainConfig, Trainer,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "morphreg-train")]
#[command(about = "Train a dense deformable registration network with landmark-based checkpoint selection")]
struct Cli {
    /// TOML file with training options; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compute device (cpu, wgpu)
    #[arg(long)]
    device: Option<String>,

    /// Training split containing fixed/ and moving/
    #[arg(long)]
    train_dir: Option<PathBuf>,

    /// Held-out split containing fixed/ and moving/
    #[arg(long)]
    test_dir: Option<PathBuf>,

    /// Landmark files of the held-out split
    #[arg(long)]
    landmark_dir: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Number of epochs
    #[arg(long)]
    n_iter: Option<usize>,

    /// Image similarity (ncc, mse)
    #[arg(long)]
    sim_loss: Option<String>,

    /// Smoothness weight
    #[arg(long)]
    alpha: Option<f64>,

    /// Bidirectional training
    #[arg(long)]
    bidir: Option<bool>,

    /// NCC window size
    #[arg(long)]
    win_size: Option<usize>,

    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    fn into_config(self) -> Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_toml_file(path)?,
            None => TrainConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        apply!(
            device, train_dir, test_dir, landmark_dir, batch_size, lr, n_iter, sim_loss, alpha,
            bidir, win_size, model_dir, log_dir, output_dir, seed
        );
        if self.no_progress {
            config.progress = false;
        }
        Ok(config)
    }
}

fn make_dirs(config: &TrainConfig) -> Result<()> {
    for dir in [&config.model_dir, &config.log_dir, &config.output_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

fn train<B: AutodiffBackend>(config: TrainConfig, device: B::Device) -> Result<()> {
    B::seed(config.seed);

    let callbacks = CallbackSet::new().with(TracingCallback).with(ConsoleCallback);
    let mut trainer = Trainer::<B>::new(config.clone(), callbacks)?;

    let train_set = NiftiPairDataset::<B>::new(&config.train_dir, &device)?;
    let eval_set = NiftiLandmarkDataset::<B::InnerBackend>::new(&config.test_dir, &config.landmark_dir, &device)?;

    let model: VxmDense<B> = config.model_config().init(&device);
    let optimizer = AdamConfig::new().init::<B, VxmDense<B>>();
    let mut writer = FileCheckpointWriter::new(&config.model_dir);

    let (_, report) = trainer.fit(model, optimizer, &train_set, &eval_set, &mut writer)?;
    tracing::info!(
        best_tre = report.best_tre,
        checkpoints = report.checkpoints.len(),
        "Run {} finished",
        report.run_timestamp
    );
    Ok(())
}

fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;
    config.validate()?;

    make_dirs(&config)?;
    let log_path = logging::init_file_logging(&config.log_dir)?;
    tracing::info!(path = %log_path.display(), ?config, "Logging initialized");

    match config.device.as_str() {
        "cpu" => train::<Autodiff<burn_ndarray::NdArray<f32>>>(config, burn_ndarray::NdArrayDevice::Cpu),
        #[cfg(feature = "wgpu")]
        "wgpu" => train::<Autodiff<burn::backend::Wgpu>>(config, burn::backend::wgpu::WgpuDevice::default()),
        other => anyhow::bail!("device '{}' is not available in this build", other),
    }
}
