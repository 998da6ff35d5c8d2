use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};
use models::{ModelKind, SliceAggregation};
use mri_dataset::{FixingMethod, Normalization, View};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Rmsprop,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

/// Parser for counts that must be at least 1.
pub fn positive() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::<usize>::new().range(1..)
}

/// Default LSTM hidden size when `--hidden-dim` is not given.
pub const DEFAULT_HIDDEN_DIM: usize = 256;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(
    name = "train",
    about = "Train an MRI slice classifier and checkpoint it every epoch"
)]
pub struct TrainArgs {
    // Experiment
    /// Dataset root containing train/, valid/, test/ (and optionally rad/).
    #[arg(long)]
    pub datadir: PathBuf,
    /// Run directory receiving args.json, log.txt, checkpoints, and plots.
    #[arg(long)]
    pub rundir: PathBuf,
    /// Free-form run name shown in the log (defaults to the run directory name).
    #[arg(long)]
    pub comment: Option<String>,
    /// MRI plane to train on.
    #[arg(long, value_enum, default_value_t = View::Sagittal)]
    pub view: View,
    /// Use the multilabel soft-margin loss.
    #[arg(long, default_value_t = false)]
    pub multilabel: bool,
    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    // Model
    #[arg(long, value_enum, default_value_t = ModelKind::Alexnet)]
    pub model: ModelKind,
    /// Checkpoint to initialize weights from.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    /// Weight the loss per class by each split's label frequencies.
    #[arg(long, default_value_t = false)]
    pub weighted_loss: bool,
    /// Slice aggregation (lrcn and mtolstm always use lstm).
    #[arg(long, value_enum)]
    pub seq: Option<SliceAggregation>,
    /// LSTM hidden size.
    #[arg(long)]
    pub hidden_dim: Option<usize>,

    // Training
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    pub optimizer: OptimizerKind,
    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f64,
    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f32,
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,
    #[arg(long, default_value_t = 1, value_parser = positive())]
    pub batch_size: usize,
    #[arg(long, default_value_t = 30)]
    pub epochs: usize,
    /// Epochs without validation improvement before the learning rate is reduced.
    #[arg(long, default_value_t = 5)]
    pub max_patience: usize,
    /// Log every training batch loss.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
    /// Write plots/loss.png after every epoch.
    #[arg(long, default_value_t = false)]
    pub plot: bool,
    /// Learning-rate multiplier applied on a plateau.
    #[arg(long, default_value_t = 0.3)]
    pub factor: f64,

    // Data loading
    /// Train on a small prefix of every split.
    #[arg(long, default_value_t = false)]
    pub toy: bool,
    /// Replicate grayscale slices into three channels.
    #[arg(long, default_value_t = false)]
    pub rgb: bool,
    /// Threads decoding exams in parallel.
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
    /// Slice image file extension.
    #[arg(long, default_value = "png")]
    pub extension: String,
    #[arg(long, default_value_t = false)]
    pub fix_num_slices: bool,
    /// Slices per exam; ignored unless --fix-num-slices.
    #[arg(long, default_value_t = 35, value_parser = positive())]
    pub num_slices: usize,
    /// Ignored unless --fix-num-slices.
    #[arg(long, value_enum, default_value_t = FixingMethod::Inner)]
    pub fixing_method: FixingMethod,
    #[arg(long, value_enum, default_value_t = Normalization::None)]
    pub normalize: Normalization,

    // Augmentation
    /// Slices are resized to scale x scale.
    #[arg(long, default_value_t = 256)]
    pub scale: u32,
    #[arg(long, default_value_t = false)]
    pub horizontal_flip: bool,
    /// Max rotation in degrees.
    #[arg(long, default_value_t = 0)]
    pub rotate: u32,
    /// Max translation in pixels.
    #[arg(long, default_value_t = 0)]
    pub shift: u32,
    /// Randomly reverse slice order.
    #[arg(long, default_value_t = false)]
    pub reverse: bool,

    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

impl TrainArgs {
    /// Name shown in the log: `--comment`, else `_<rundir name>`.
    pub fn run_name(&self) -> String {
        match &self.comment {
            Some(c) => c.clone(),
            None => format!(
                "_{}",
                self.rundir
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim.unwrap_or(DEFAULT_HIDDEN_DIM)
    }

    pub fn fix_slices(&self) -> Option<(usize, FixingMethod)> {
        self.fix_num_slices
            .then_some((self.num_slices, self.fixing_method))
    }
}
