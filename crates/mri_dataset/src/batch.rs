//! Batch iteration for training and evaluation.

use crate::aug::VolumeTransform;
use crate::split::SplitIndex;
use crate::types::{ClassWeights, DatasetResult, MriDatasetError, Split, VolumeSample};
use crate::volume::load_volume;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Shuffle exam order every epoch.
    pub shuffle: bool,
    /// Apply the transform's random augmentation.
    pub augment: bool,
    /// Seed for reproducible shuffling and augmentation.
    pub seed: Option<u64>,
    /// Threads used to decode exams within a batch.
    pub workers: usize,
    pub transform: VolumeTransform,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            augment: false,
            seed: None,
            workers: 1,
            transform: VolumeTransform::default(),
        }
    }
}

impl LoaderConfig {
    /// Evaluation counterpart: fixed order, no augmentation.
    pub fn for_eval(&self) -> Self {
        Self {
            shuffle: false,
            augment: false,
            transform: self.transform.without_augmentation(),
            ..self.clone()
        }
    }
}

pub struct VolumeBatch<B: Backend> {
    /// `[N, S, C, H, W]`
    pub volumes: Tensor<B, 5>,
    /// `[N, K]` multi-hot targets.
    pub labels: Tensor<B, 2>,
    pub exams: Vec<String>,
}

/// A split plus the settings needed to iterate it once per epoch.
pub struct SplitLoader {
    index: SplitIndex,
    cfg: LoaderConfig,
    pool: rayon::ThreadPool,
}

impl SplitLoader {
    pub fn new(index: SplitIndex, cfg: LoaderConfig) -> DatasetResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers.max(1))
            .build()
            .map_err(|e| MriDatasetError::ThreadPool(e.to_string()))?;
        Ok(Self { index, cfg, pool })
    }

    pub fn split(&self) -> Split {
        self.index.split
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.index.num_classes()
    }

    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.cfg.batch_size.max(1))
    }

    pub fn class_weights(&self) -> ClassWeights {
        self.index.class_weights()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn iter(&self, epoch: usize) -> BatchIter<'_> {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(mix_seed(seed, epoch, 0)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        BatchIter {
            loader: self,
            order,
            cursor: 0,
            epoch,
            batches: 0,
            started: Instant::now(),
        }
    }

    fn load_exam(&self, position: usize, epoch: usize) -> DatasetResult<VolumeSample> {
        let entry = &self.index.entries[position];
        let transform = &self.cfg.transform;
        let aug = if self.cfg.augment && transform.augments() {
            let mut rng = match self.cfg.seed {
                Some(seed) => {
                    rand::rngs::StdRng::seed_from_u64(mix_seed(seed, epoch, position as u64 + 1))
                }
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            transform.sample(&mut rng)
        } else {
            Default::default()
        };
        load_volume(entry, transform, aug)
    }
}

fn mix_seed(seed: u64, epoch: usize, salt: u64) -> u64 {
    seed ^ ((epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)) ^ salt.rotate_left(32)
}

pub struct BatchIter<'a> {
    loader: &'a SplitLoader,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    batches: usize,
    started: Instant,
}

impl BatchIter<'_> {
    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<VolumeBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let batch_size = self.loader.cfg.batch_size.max(1);
        let end = (self.cursor + batch_size).min(self.order.len());
        let positions = &self.order[self.cursor..end];
        self.cursor = end;

        let loader = self.loader;
        let epoch = self.epoch;
        let samples: Vec<VolumeSample> = loader.pool.install(|| {
            positions
                .par_iter()
                .map(|pos| loader.load_exam(*pos, epoch))
                .collect::<DatasetResult<Vec<_>>>()
        })?;

        let batch = assemble::<B>(samples, device)?;
        self.batches += 1;
        tracing::trace!(
            split = %loader.split(),
            batch = self.batches,
            exams = batch.exams.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "assembled batch"
        );
        Ok(Some(batch))
    }
}

fn assemble<B: Backend>(
    samples: Vec<VolumeSample>,
    device: &B::Device,
) -> DatasetResult<VolumeBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(MriDatasetError::Other("cannot assemble an empty batch".into()));
    };
    let (slices, channels, height, width) =
        (first.slices, first.channels, first.height, first.width);
    let num_classes = first.labels.len();
    let n = samples.len();

    let mut volumes = Vec::with_capacity(n * slices * channels * height * width);
    let mut labels = Vec::with_capacity(n * num_classes);
    let mut exams = Vec::with_capacity(n);
    for sample in samples {
        if sample.slices != slices {
            return Err(MriDatasetError::SliceCountMismatch {
                exam: sample.exam,
                expected: slices,
                actual: sample.slices,
            });
        }
        if sample.labels.len() != num_classes {
            return Err(MriDatasetError::Other(format!(
                "exam {} has {} classes, expected {num_classes}",
                sample.exam,
                sample.labels.len()
            )));
        }
        volumes.extend_from_slice(&sample.data);
        labels.extend_from_slice(&sample.labels);
        exams.push(sample.exam);
    }

    let volumes = Tensor::<B, 5>::from_data(
        TensorData::new(volumes, [n, slices, channels, height, width]),
        device,
    );
    let labels = Tensor::<B, 2>::from_data(TensorData::new(labels, [n, num_classes]), device);
    Ok(VolumeBatch {
        volumes,
        labels,
        exams,
    })
}
