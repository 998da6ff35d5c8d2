//! Core types, error definitions, and data structures for mri_dataset.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, MriDatasetError>;

#[derive(Debug, Error)]
pub enum MriDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Labels(#[from] data_contracts::LabelsError),
    #[error("exam directory missing for {exam}: {path}")]
    MissingExam { exam: String, path: PathBuf },
    #[error("no .{extension} slices found in {path}")]
    EmptyExam { path: PathBuf, extension: String },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("batch mixes slice counts ({expected} vs {actual} in exam {exam}); enable slice fixing for batch sizes above 1")]
    SliceCountMismatch {
        exam: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to build loader thread pool: {0}")]
    ThreadPool(String),
    #[error("{0}")]
    Other(String),
}

/// Acquisition plane of an MRI exam.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Sagittal,
    Coronal,
    Axial,
    /// All three planes; accepted on the command line but not trainable yet.
    All,
}

impl View {
    pub fn dir_name(&self) -> &'static str {
        match self {
            View::Sagittal => "sagittal",
            View::Coronal => "coronal",
            View::Axial => "axial",
            View::All => "all",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Named partition of the dataset root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Valid,
    Test,
    /// Radiologist-reviewed subset; optional on disk.
    Rad,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
            Split::Rad => "rad",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// How a volume is brought to a fixed number of slices.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixingMethod {
    /// Keep the central slices; repeat edge slices when the exam is short.
    Inner,
    /// Sample evenly spaced slice indices across the whole exam.
    Uniform,
}

/// Per-exam intensity normalization applied after augmentation.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Pixel values scaled to [0, 1].
    None,
    /// Zero mean, unit variance over the whole exam.
    Instance,
    /// Rescaled so the exam spans exactly [0, 1].
    Minmax,
}

/// One decoded exam.
#[derive(Debug, Clone)]
pub struct VolumeSample {
    pub exam: String,
    pub slices: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Voxels in `[S, C, H, W]` order.
    pub data: Vec<f32>,
    pub labels: Vec<f32>,
}

impl VolumeSample {
    pub fn slice_len(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// Per-class weights for a weighted binary cross-entropy.
///
/// Positives are weighted by the negative frequency and negatives by the positive
/// frequency, so the rarer outcome of each class contributes more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub pos: Vec<f32>,
    pub neg: Vec<f32>,
}

impl ClassWeights {
    pub fn from_labels<'a>(
        labels: impl IntoIterator<Item = &'a [f32]>,
        num_classes: usize,
    ) -> Self {
        let mut positives = vec![0usize; num_classes];
        let mut total = 0usize;
        for row in labels {
            total += 1;
            for (k, v) in row.iter().take(num_classes).enumerate() {
                if *v > 0.5 {
                    positives[k] += 1;
                }
            }
        }
        if total == 0 {
            return Self::uniform(num_classes);
        }
        let total = total as f32;
        let pos = positives
            .iter()
            .map(|p| (total - *p as f32) / total)
            .collect();
        let neg = positives.iter().map(|p| *p as f32 / total).collect();
        Self { pos, neg }
    }

    pub fn uniform(num_classes: usize) -> Self {
        Self {
            pos: vec![1.0; num_classes],
            neg: vec![1.0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.pos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_weights_favor_rare_outcome() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 0.0], vec![0.0, 0.0], vec![0.0, 1.0]];
        let w = ClassWeights::from_labels(rows.iter().map(|r| r.as_slice()), 2);
        assert!((w.pos[0] - 0.75).abs() < 1e-6);
        assert!((w.neg[0] - 0.25).abs() < 1e-6);
        assert!((w.pos[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn class_weights_empty_split_is_uniform() {
        let w = ClassWeights::from_labels(std::iter::empty(), 3);
        assert_eq!(w, ClassWeights::uniform(3));
    }
}
