#![recursion_limit = "256"]

pub mod args;
pub mod checkpoint;
pub mod eval;
pub mod loss;
pub mod metrics;
pub mod plot;
pub mod schedule;
pub mod util;

pub use args::{BackendKind, OptimizerKind, TrainArgs};
pub use checkpoint::{checkpoint_name, load_classifier, save_classifier};
pub use eval::{evaluate_checkpoint, EvalReport};
pub use loss::{ClassificationLoss, LossKind};
pub use models::{ModelKind, MriClassifier, MriClassifierConfig, SliceAggregation};
pub use schedule::{PlateauConfig, ReduceLrOnPlateau};
pub use util::{run_train, EpochRecord, TrainHistory};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
