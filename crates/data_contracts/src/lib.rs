//! Shared data contracts for MRI exam datasets.

pub mod labels;

pub use labels::{load_labels, ExamLabel, LabelsError, ValidationError};
