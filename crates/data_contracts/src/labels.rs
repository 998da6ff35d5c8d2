use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One exam and its multi-hot label vector, as stored in `labels.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamLabel {
    pub exam: String,
    pub labels: Vec<f32>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("exam id is empty")]
    EmptyExam,
    #[error("exam {0} has no labels")]
    NoLabels(String),
    #[error("exam {exam} has non-binary label {value} at class {class}")]
    NonBinary { exam: String, class: usize, value: f32 },
}

#[derive(Debug, Error)]
pub enum LabelsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid record in {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
    #[error("{path}: exam {exam} has {actual} classes, expected {expected}")]
    ClassCount {
        path: PathBuf,
        exam: String,
        actual: usize,
        expected: usize,
    },
}

impl ExamLabel {
    pub fn new(exam: impl Into<String>, labels: Vec<f32>) -> Self {
        Self {
            exam: exam.into(),
            labels,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exam.trim().is_empty() {
            return Err(ValidationError::EmptyExam);
        }
        if self.labels.is_empty() {
            return Err(ValidationError::NoLabels(self.exam.clone()));
        }
        for (class, value) in self.labels.iter().enumerate() {
            if *value != 0.0 && *value != 1.0 {
                return Err(ValidationError::NonBinary {
                    exam: self.exam.clone(),
                    class,
                    value: *value,
                });
            }
        }
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Number of classes marked positive for this exam.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|v| **v > 0.5).count()
    }
}

/// Read and validate a `labels.json` file. All records must agree on the class count.
pub fn load_labels(path: &Path) -> Result<Vec<ExamLabel>, LabelsError> {
    let bytes = fs::read(path).map_err(|source| LabelsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records: Vec<ExamLabel> =
        serde_json::from_slice(&bytes).map_err(|source| LabelsError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let mut expected: Option<usize> = None;
    for record in &records {
        record.validate().map_err(|source| LabelsError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;
        match expected {
            None => expected = Some(record.num_classes()),
            Some(k) if k != record.num_classes() => {
                return Err(LabelsError::ClassCount {
                    path: path.to_path_buf(),
                    exam: record.exam.clone(),
                    actual: record.num_classes(),
                    expected: k,
                });
            }
            _ => {}
        }
    }
    Ok(records)
}
