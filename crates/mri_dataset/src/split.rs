//! Indexing a dataset split on disk.

use crate::types::{ClassWeights, DatasetResult, MriDatasetError, Split, View};
use data_contracts::load_labels;
use std::fs;
use std::path::{Path, PathBuf};

/// An exam whose slices live in `dir`.
#[derive(Debug, Clone)]
pub struct ExamEntry {
    pub exam: String,
    pub dir: PathBuf,
    pub labels: Vec<f32>,
    /// Slice image paths, sorted by file name.
    pub slices: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SplitIndex {
    pub split: Split,
    pub view: View,
    pub entries: Vec<ExamEntry>,
    num_classes: usize,
}

impl SplitIndex {
    /// Index `<datadir>/<split>/labels.json` and the exam folders under `<view>/`.
    pub fn load(datadir: &Path, split: Split, view: View, extension: &str) -> DatasetResult<Self> {
        let split_dir = datadir.join(split.dir_name());
        let records = load_labels(&split_dir.join("labels.json"))?;
        let view_dir = split_dir.join(view.dir_name());

        let num_classes = records.first().map(|r| r.num_classes()).unwrap_or(0);
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let dir = view_dir.join(&record.exam);
            if !dir.is_dir() {
                return Err(MriDatasetError::MissingExam {
                    exam: record.exam,
                    path: dir,
                });
            }
            let slices = list_slices(&dir, extension)?;
            if slices.is_empty() {
                return Err(MriDatasetError::EmptyExam {
                    path: dir,
                    extension: extension.to_string(),
                });
            }
            entries.push(ExamEntry {
                exam: record.exam,
                dir,
                labels: record.labels,
                slices,
            });
        }

        tracing::debug!(
            split = %split,
            view = %view,
            exams = entries.len(),
            num_classes,
            "indexed split"
        );

        Ok(Self {
            split,
            view,
            entries,
            num_classes,
        })
    }

    /// Like [`SplitIndex::load`], but `Ok(None)` when the split directory does not exist.
    pub fn load_optional(
        datadir: &Path,
        split: Split,
        view: View,
        extension: &str,
    ) -> DatasetResult<Option<Self>> {
        if !datadir.join(split.dir_name()).is_dir() {
            return Ok(None);
        }
        Self::load(datadir, split, view, extension).map(Some)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the first `n` exams.
    pub fn truncate(&mut self, n: usize) {
        self.entries.truncate(n);
    }

    pub fn class_weights(&self) -> ClassWeights {
        ClassWeights::from_labels(
            self.entries.iter().map(|e| e.labels.as_slice()),
            self.num_classes,
        )
    }
}

fn list_slices(dir: &Path, extension: &str) -> DatasetResult<Vec<PathBuf>> {
    let io_err = |source| MriDatasetError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut slices = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let matches = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches && path.is_file() {
            slices.push(path);
        }
    }
    slices.sort();
    Ok(slices)
}
