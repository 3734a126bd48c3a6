use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use burn_ndarray::NdArray;
use morphreg_core::{LandmarkSet, Point3, Spacing3, Volume};
use morphreg_io::write_volume;
use morphreg_model::{RegistrationModel, VxmDense};
use morphreg_train::checkpoint::read_checkpoint_meta;
use morphreg_train::{
    load_model_checkpoint, CallbackSet, Checkpoint, CheckpointSelector, CheckpointWriter,
    FileCheckpointWriter, HistoryCallback, ImagePair, InMemoryLandmarkDataset, InMemoryPairDataset, LandmarkPair, NiftiLandmarkDataset,
    NiftiPairDataset, TrainConfig, TrainError, Trainer,
};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

type Inner = NdArray<f32>;
type TestBackend = Autodiff<Inner>;

const SIZE: usize = 8;

fn blob_values(center: [f32; 3]) -> Vec<f32> {
    let mut values = Vec::with_capacity(SIZE * SIZE * SIZE);
    for z in 0..SIZE {
        for y in 0..SIZE {
            for x in 0..SIZE {
                let r2 = (z as f32 - center[0]).powi(2)
                    + (y as f32 - center[1]).powi(2)
                    + (x as f32 - center[2]).powi(2);
                values.push((-r2 / 6.0).exp());
            }
        }
    }
    values
}

fn blob<B: Backend>(center: [f32; 3], device: &B::Device) -> Volume<B> {
    let data = Tensor::<B, 3>::from_data(TensorData::new(blob_values(center), [SIZE, SIZE, SIZE]), device);
    Volume::new(data, Spacing3::new(1.0, 1.0, 1.0))
}

fn small_config(root: &Path) -> TrainConfig {
    TrainConfig {
        train_dir: root.join("train"),
        test_dir: root.join("test"),
        landmark_dir: root.join("landmarks"),
        model_dir: root.join("Checkpoint"),
        log_dir: root.join("Log"),
        output_dir: root.join("Result"),
        n_iter: 1,
        win_size: 3,
        enc_features: vec![4, 8],
        dec_features: vec![8, 8, 4],
        int_steps: 3,
        progress: false,
        ..Default::default()
    }
}

fn write_split(root: &Path, name: &str, cases: &[([f32; 3], [f32; 3])]) -> anyhow::Result<()> {
    let device = Default::default();
    std::fs::create_dir_all(root.join(name).join("fixed"))?;
    std::fs::create_dir_all(root.join(name).join("moving"))?;
    for (i, (fixed, moving)) in cases.iter().enumerate() {
        let file = format!("case_{:02}.nii.gz", i);
        write_volume(root.join(name).join("fixed").join(&file), &blob::<Inner>(*fixed, &device))?;
        write_volume(root.join(name).join("moving").join(&file), &blob::<Inner>(*moving, &device))?;
    }
    Ok(())
}

fn model(config: &TrainConfig) -> VxmDense<TestBackend> {
    config.model_config().init(&Default::default())
}

#[test]
fn test_end_to_end_identical_landmarks_write_checkpoint() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    write_split(root, "train", &[([3.5, 3.5, 3.5], [3.5, 3.5, 4.5]), ([3.0, 4.0, 3.5], [3.5, 3.5, 3.0])])?;
    write_split(root, "test", &[([3.5, 3.5, 3.5], [3.5, 3.5, 3.5])])?;
    std::fs::create_dir_all(root.join("landmarks"))?;
    std::fs::write(root.join("landmarks/case_00.txt"), "2 3 4 2 3 4\n5 5 5 5 5 5\n")?;

    let config = small_config(root);
    TestBackend::seed(config.seed);
    let device = Default::default();
    let train_set = NiftiPairDataset::<TestBackend>::new(&config.train_dir, &device)?;
    let eval_set = NiftiLandmarkDataset::<Inner>::new(&config.test_dir, &config.landmark_dir, &device)?;
    assert_eq!(train_set.files().len(), 2);

    let history = HistoryCallback::new();
    let mut trainer = Trainer::<TestBackend>::new(config.clone(), CallbackSet::new().with(history.clone()))?
        .with_run_timestamp("2024-05-06-07-08-09");
    let mut writer = FileCheckpointWriter::new(&config.model_dir);
    let optimizer = AdamConfig::new().init::<TestBackend, VxmDense<TestBackend>>();

    let (trained, report) = trainer.fit(model(&config), optimizer, &train_set, &eval_set, &mut writer)?;

    assert_eq!(report.epochs.len(), 1);
    let epoch = report.epochs[0];
    assert!(epoch.train_loss.is_finite());
    assert!(epoch.tre < 0.1, "tre = {}", epoch.tre);
    assert_eq!(report.best_tre, epoch.tre);

    let steps = history.steps();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].components.len(), 2);
    assert_eq!(steps[0].components[0].0, "sim");
    assert!(steps.iter().all(|s| s.sample_id.starts_with("case_")));
    assert!((epoch.train_loss - (steps[0].loss + steps[1].loss) / 2.0).abs() < 1e-9);

    assert_eq!(report.checkpoints.len(), 1);
    let checkpoint = &report.checkpoints[0];
    assert_eq!(checkpoint, &config.model_dir.join("2024-05-06-07-08-09").join("epoch_1"));
    assert!(checkpoint.join("model.mpk").exists());
    assert!(checkpoint.join("optimizer.mpk").exists());
    let meta = read_checkpoint_meta(checkpoint)?;
    assert_eq!(meta.epoch, 1);
    assert_eq!(meta.metrics.tre, epoch.tre);
    let recorded = history.checkpoints();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, meta);
    assert_eq!(&recorded[0].1, checkpoint);
    assert_eq!(history.completed(), Some(epoch.tre));

    // Restored weights reproduce the trained network.
    let restored: VxmDense<Inner> = load_model_checkpoint(config.model_config().init::<Inner>(&device), checkpoint, &device)?;
    let moving = blob::<Inner>([3.5, 3.5, 4.5], &device).to_batch();
    let fixed = blob::<Inner>([3.5, 3.5, 3.5], &device).to_batch();
    let expected = trained.valid().forward(moving.clone(), fixed.clone()).displacement;
    let actual = restored.forward(moving, fixed).displacement;
    let diff: f32 = (expected - actual).abs().max().into_scalar();
    assert!(diff < 1e-6);
    Ok(())
}

fn in_memory_pair<B: Backend>(moving: [f32; 3], fixed: [f32; 3], id: &str) -> ImagePair<B> {
    let device = Default::default();
    ImagePair {
        moving: blob(moving, &device),
        fixed: blob(fixed, &device),
        id: id.to_string(),
    }
}

fn identical_landmarks() -> LandmarkSet {
    LandmarkSet::new(vec![Point3::new(4.0, 4.0, 4.0)], vec![Point3::new(4.0, 4.0, 4.0)]).unwrap()
}

#[test]
fn test_bidirectional_run_records_three_components() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = TrainConfig {
        bidir: true,
        n_iter: 2,
        sim_loss: "mse".to_string(),
        ..small_config(dir.path())
    };
    let train_set = InMemoryPairDataset::new(vec![
        in_memory_pair::<TestBackend>([3.5, 3.5, 4.5], [3.5, 3.5, 3.5], "moving/a.nii.gz"),
        in_memory_pair::<TestBackend>([3.5, 4.5, 3.5], [3.5, 3.5, 3.5], "moving/b.nii.gz"),
    ]);
    let eval_set = InMemoryLandmarkDataset::new(vec![LandmarkPair {
        pair: in_memory_pair::<Inner>([3.5, 3.5, 3.5], [3.5, 3.5, 3.5], "moving/c.nii.gz"),
        landmarks: identical_landmarks(),
    }]);

    let history = HistoryCallback::new();
    let mut trainer = Trainer::<TestBackend>::new(config.clone(), CallbackSet::new().with(history.clone()))?;
    assert_eq!(trainer.composer().weights(), &[0.5, 0.5, 1.0]);

    let mut writer = FileCheckpointWriter::new(&config.model_dir);
    let optimizer = AdamConfig::new().init::<TestBackend, VxmDense<TestBackend>>();
    let (_, report) = trainer.fit(model(&config), optimizer, &train_set, &eval_set, &mut writer)?;

    let steps = history.steps();
    assert_eq!(steps.len(), 4);
    let names: Vec<&str> = steps[0].components.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["sim", "bisim", "grad"]);
    for step in &steps {
        let summed: f64 = step.components.iter().map(|(_, v)| v).sum();
        assert!((summed - step.loss).abs() < 1e-5);
    }
    assert_eq!(report.epochs.len(), 2);
    // The first epoch is always accepted; later ones only with a real gain.
    assert!(!report.checkpoints.is_empty());
    assert!(report.checkpoints.len() <= 2);
    assert_eq!(history.epochs().len(), 2);
    Ok(())
}

/// Records the epoch of every write without touching the filesystem.
#[derive(Debug, Default)]
struct CountingWriter {
    epochs: Vec<usize>,
}

impl<B, M, O> CheckpointWriter<B, M, O> for CountingWriter
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn write(&mut self, checkpoint: &Checkpoint<'_, M, O>) -> morphreg_train::Result<PathBuf> {
        self.epochs.push(checkpoint.meta.epoch);
        Ok(PathBuf::from(format!("epoch_{}", checkpoint.meta.epoch)))
    }
}

#[test]
fn test_stalled_tre_writes_only_first_checkpoint() -> anyhow::Result<()> {
    let dir = tempdir()?;
    // Identical volumes and landmarks keep TRE near zero, so no later epoch
    // can beat the first one by more than the margin.
    let config = TrainConfig {
        n_iter: 4,
        lr: 1e-8,
        sim_loss: "mse".to_string(),
        ..small_config(dir.path())
    };
    let train_set = InMemoryPairDataset::new(vec![in_memory_pair::<TestBackend>([3.5; 3], [3.5; 3], "a")]);
    let eval_set = InMemoryLandmarkDataset::new(vec![LandmarkPair {
        pair: in_memory_pair::<Inner>([3.5; 3], [3.5; 3], "c"),
        landmarks: identical_landmarks(),
    }]);

    let history = HistoryCallback::new();
    let mut trainer = Trainer::<TestBackend>::new(config.clone(), CallbackSet::new().with(history.clone()))?;
    let mut writer = CountingWriter::default();
    let optimizer = AdamConfig::new().init::<TestBackend, VxmDense<TestBackend>>();
    let (_, report) = trainer.fit(model(&config), optimizer, &train_set, &eval_set, &mut writer)?;

    assert_eq!(writer.epochs, vec![1]);
    assert_eq!(report.checkpoints, vec![PathBuf::from("epoch_1")]);
    assert_eq!(report.epochs.len(), 4);
    assert!(report.epochs[0].tre < config.margin, "tre = {}", report.epochs[0].tre);
    assert_eq!(report.best_tre, report.epochs[0].tre);

    // Replaying the epoch TREs accepts only the first and never raises the best.
    let mut selector = CheckpointSelector::new(config.margin);
    let mut previous = f64::INFINITY;
    for (i, epoch) in report.epochs.iter().enumerate() {
        assert_eq!(selector.consider(epoch.tre), i == 0, "epoch {}", epoch.epoch);
        assert!(selector.best() <= previous);
        previous = selector.best();
    }
    assert_eq!(trainer.state().best_tre, report.best_tre);
    assert_eq!(history.checkpoints().len(), 1);
    assert_eq!(history.checkpoints()[0].0.epoch, 1);
    assert!(!config.model_dir.exists());
    Ok(())
}

#[test]
fn test_non_finite_loss_aborts_run() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = TrainConfig {
        sim_loss: "mse".to_string(),
        ..small_config(dir.path())
    };
    let device = Default::default();
    let mut values = blob_values([3.5, 3.5, 3.5]);
    values[0] = f32::NAN;
    let broken = Volume::new(
        Tensor::<TestBackend, 3>::from_data(TensorData::new(values, [SIZE, SIZE, SIZE]), &device),
        Spacing3::new(1.0, 1.0, 1.0),
    );
    let train_set = InMemoryPairDataset::new(vec![ImagePair {
        moving: broken,
        fixed: blob([3.5, 3.5, 3.5], &device),
        id: "broken.nii.gz".to_string(),
    }]);
    let eval_set = InMemoryLandmarkDataset::new(vec![LandmarkPair {
        pair: in_memory_pair::<Inner>([3.5, 3.5, 3.5], [3.5, 3.5, 3.5], "c"),
        landmarks: identical_landmarks(),
    }]);

    let history = HistoryCallback::new();
    let mut trainer = Trainer::<TestBackend>::new(config.clone(), CallbackSet::new().with(history.clone()))?;
    let mut writer = FileCheckpointWriter::new(&config.model_dir);
    let optimizer = AdamConfig::new().init::<TestBackend, VxmDense<TestBackend>>();
    let err = trainer
        .fit(model(&config), optimizer, &train_set, &eval_set, &mut writer)
        .unwrap_err();

    assert!(matches!(err, TrainError::NumericalInstability(_)));
    assert_eq!(history.errors().len(), 1);
    assert!(history.checkpoints().is_empty());
    assert!(!config.model_dir.exists());
    Ok(())
}

#[test]
fn test_bidir_mismatch_is_configuration_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = small_config(dir.path());
    let bidir_model: VxmDense<TestBackend> = config.model_config().with_bidir(true).init(&Default::default());
    assert!(bidir_model.bidir());

    let train_set = InMemoryPairDataset::new(vec![in_memory_pair::<TestBackend>([3.5; 3], [3.5; 3], "a")]);
    let eval_set = InMemoryLandmarkDataset::new(vec![LandmarkPair {
        pair: in_memory_pair::<Inner>([3.5; 3], [3.5; 3], "c"),
        landmarks: identical_landmarks(),
    }]);
    let mut trainer = Trainer::<TestBackend>::new(config.clone(), CallbackSet::new())?;
    let mut writer = FileCheckpointWriter::new(&config.model_dir);
    let optimizer = AdamConfig::new().init::<TestBackend, VxmDense<TestBackend>>();
    let err = trainer
        .fit(bidir_model, optimizer, &train_set, &eval_set, &mut writer)
        .unwrap_err();
    assert!(matches!(err, TrainError::Configuration(_)));
    Ok(())
}

#[test]
fn test_missing_landmark_file_is_landmark_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    write_split(dir.path(), "test", &[([3.5; 3], [3.5; 3])])?;
    std::fs::create_dir_all(dir.path().join("landmarks"))?;
    let result = NiftiLandmarkDataset::<Inner>::new(dir.path().join("test"), dir.path().join("landmarks"), &Default::default());
    assert!(matches!(result, Err(TrainError::Landmark(_))));
    Ok(())
}
