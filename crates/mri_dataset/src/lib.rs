//! Exam indexing, volume loading, augmentation, and Burn-compatible batching for MRI
//! slice classification.
//!
//! This crate provides utilities for:
//! - Indexing dataset splits (`<datadir>/<split>/labels.json` plus per-view exam folders)
//! - Decoding an exam's slice images into a `[S, C, H, W]` volume
//! - Slice-count fixing, augmentation, and intensity normalization
//! - Class weights for a weighted loss
//! - Burn batch iteration with parallel exam decoding

pub mod aug;
pub mod batch;
pub mod split;
pub mod types;
pub mod volume;

pub use aug::{fix_slices, ExamAugmentation, VolumeTransform, VolumeTransformBuilder};
pub use batch::{BatchIter, LoaderConfig, SplitLoader, VolumeBatch};
pub use split::{ExamEntry, SplitIndex};
pub use types::*;
pub use volume::load_volume;
