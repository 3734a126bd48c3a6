//! Paired-volume datasets and the shuffling batch loader.

use crate::error::{Result, TrainError};
use burn::tensor::{backend::Backend, Tensor};
use morphreg_core::{LandmarkSet, Volume};
use morphreg_io::{list_landmark_files, read_landmarks, read_volume, SplitFiles};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// One moving/fixed training pair.
#[derive(Debug, Clone)]
pub struct ImagePair<B: Backend> {
    pub moving: Volume<B>,
    pub fixed: Volume<B>,
    /// Source of the moving volume, for diagnostics only.
    pub id: String,
}

/// A held-out pair with its landmark correspondences.
#[derive(Debug, Clone)]
pub struct LandmarkPair<B: Backend> {
    pub pair: ImagePair<B>,
    pub landmarks: LandmarkSet,
}

pub trait PairDataset<B: Backend> {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<ImagePair<B>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait LandmarkPairDataset<B: Backend> {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<LandmarkPair<B>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn out_of_range(index: usize, len: usize) -> TrainError {
    TrainError::data(format!("index {} out of range for dataset of {} pairs", index, len))
}

fn read_pair<B: Backend>(moving: &Path, fixed: &Path, device: &B::Device) -> Result<ImagePair<B>> {
    let moving_volume = read_volume::<B, _>(moving, device).map_err(TrainError::from_io_chain)?;
    let fixed_volume = read_volume::<B, _>(fixed, device).map_err(TrainError::from_io_chain)?;
    if moving_volume.shape() != fixed_volume.shape() {
        return Err(TrainError::ShapeMismatch {
            expected: fixed_volume.shape().to_vec(),
            actual: moving_volume.shape().to_vec(),
        });
    }
    Ok(ImagePair {
        moving: moving_volume,
        fixed: fixed_volume,
        id: moving.display().to_string(),
    })
}

/// Training pairs read lazily from `root/fixed` and `root/moving`.
#[derive(Debug, Clone)]
pub struct NiftiPairDataset<B: Backend> {
    files: SplitFiles,
    device: B::Device,
}

impl<B: Backend> NiftiPairDataset<B> {
    pub fn new<P: AsRef<Path>>(root: P, device: &B::Device) -> Result<Self> {
        let files = SplitFiles::from_dir(root).map_err(TrainError::from_io_chain)?;
        Ok(Self {
            files,
            device: device.clone(),
        })
    }

    pub fn files(&self) -> &SplitFiles {
        &self.files
    }
}

impl<B: Backend> PairDataset<B> for NiftiPairDataset<B> {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<ImagePair<B>> {
        match (self.files.moving.get(index), self.files.fixed.get(index)) {
            (Some(moving), Some(fixed)) => read_pair(moving, fixed, &self.device),
            _ => Err(out_of_range(index, self.len())),
        }
    }
}

/// Held-out pairs plus landmark files, paired by sorted position.
#[derive(Debug, Clone)]
pub struct NiftiLandmarkDataset<B: Backend> {
    files: SplitFiles,
    landmarks: Vec<PathBuf>,
    device: B::Device,
}

impl<B: Backend> NiftiLandmarkDataset<B> {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(root: P, landmark_dir: Q, device: &B::Device) -> Result<Self> {
        let files = SplitFiles::from_dir(root).map_err(TrainError::from_io_chain)?;
        let landmarks = list_landmark_files(landmark_dir).map_err(|e| TrainError::landmark(format!("{:#}", e)))?;
        if landmarks.len() != files.len() {
            return Err(TrainError::landmark(format!(
                "{} landmark files for {} held-out pairs",
                landmarks.len(),
                files.len()
            )));
        }
        Ok(Self {
            files,
            landmarks,
            device: device.clone(),
        })
    }
}

impl<B: Backend> LandmarkPairDataset<B> for NiftiLandmarkDataset<B> {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn get(&self, index: usize) -> Result<LandmarkPair<B>> {
        let (moving, fixed, landmark_file) = match (
            self.files.moving.get(index),
            self.files.fixed.get(index),
            self.landmarks.get(index),
        ) {
            (Some(m), Some(f), Some(l)) => (m, f, l),
            _ => return Err(out_of_range(index, self.len())),
        };
        let pair = read_pair(moving, fixed, &self.device)?;
        let landmarks = read_landmarks(landmark_file).map_err(|e| TrainError::landmark(format!("{:#}", e)))?;
        Ok(LandmarkPair { pair, landmarks })
    }
}

/// Pairs held in memory, for synthetic runs and tests.
#[derive(Debug, Clone)]
pub struct InMemoryPairDataset<B: Backend> {
    pairs: Vec<ImagePair<B>>,
}

impl<B: Backend> InMemoryPairDataset<B> {
    pub fn new(pairs: Vec<ImagePair<B>>) -> Self {
        Self { pairs }
    }
}

impl<B: Backend> PairDataset<B> for InMemoryPairDataset<B> {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize) -> Result<ImagePair<B>> {
        self.pairs
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.pairs.len()))
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryLandmarkDataset<B: Backend> {
    pairs: Vec<LandmarkPair<B>>,
}

impl<B: Backend> InMemoryLandmarkDataset<B> {
    pub fn new(pairs: Vec<LandmarkPair<B>>) -> Self {
        Self { pairs }
    }
}

impl<B: Backend> LandmarkPairDataset<B> for InMemoryLandmarkDataset<B> {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize) -> Result<LandmarkPair<B>> {
        self.pairs
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.pairs.len()))
    }
}

/// Volumes of one step stacked along the batch axis.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// `[B, 1, D, H, W]`
    pub moving: Tensor<B, 5>,
    /// `[B, 1, D, H, W]`
    pub fixed: Tensor<B, 5>,
    /// File name of the first moving volume.
    pub id: String,
}

/// Splits a dataset into batches, reshuffled every epoch from a seeded RNG.
#[derive(Debug, Clone)]
pub struct BatchLoader {
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl BatchLoader {
    pub fn new(batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn num_batches(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Index groups for the next epoch. The last group may be short.
    pub fn epoch_order(&mut self, len: usize) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..len).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }
        indices.chunks(self.batch_size).map(|chunk| chunk.to_vec()).collect()
    }

    /// Read and stack the pairs at `indices`.
    pub fn load<B: Backend, D: PairDataset<B>>(&self, dataset: &D, indices: &[usize]) -> Result<Batch<B>> {
        let mut moving = Vec::with_capacity(indices.len());
        let mut fixed = Vec::with_capacity(indices.len());
        let mut id = None;
        let mut expected: Option<[usize; 3]> = None;

        for &index in indices {
            let pair = dataset.get(index)?;
            for shape in [pair.moving.shape(), pair.fixed.shape()] {
                match expected {
                    Some(first) if first != shape => {
                        return Err(TrainError::ShapeMismatch {
                            expected: first.to_vec(),
                            actual: shape.to_vec(),
                        })
                    }
                    Some(_) => {}
                    None => expected = Some(shape),
                }
            }
            if id.is_none() {
                id = Some(sample_name(&pair.id));
            }
            moving.push(pair.moving.to_batch());
            fixed.push(pair.fixed.to_batch());
        }

        let id = id.ok_or_else(|| TrainError::data("cannot load an empty batch"))?;
        Ok(Batch {
            moving: Tensor::cat(moving, 0),
            fixed: Tensor::cat(fixed, 0),
            id,
        })
    }
}

/// File name part of a sample source, or the source itself.
pub fn sample_name(source: &str) -> String {
    Path::new(source)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string())
}
