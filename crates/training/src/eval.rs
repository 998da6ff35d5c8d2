//! Checkpoint evaluation on a held-out split.

use burn::tensor::backend::Backend;
use mri_dataset::{LoaderConfig, Split, SplitIndex, SplitLoader};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::checkpoint::load_classifier;
use crate::loss::ClassificationLoss;
use crate::metrics::{class_metrics, ClassMetrics};
use crate::util::{build_model_config, load_run_args, run_eval_epoch, transform_from_args};
use crate::TrainBackend;

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub split: Split,
    pub checkpoint: PathBuf,
    pub exams: usize,
    pub loss: f32,
    pub classes: Vec<ClassMetrics>,
}

impl EvalReport {
    /// Mean AUC over classes that have one.
    pub fn mean_auc(&self) -> Option<f32> {
        let aucs: Vec<f32> = self.classes.iter().filter_map(|c| c.auc).collect();
        (!aucs.is_empty()).then(|| aucs.iter().sum::<f32>() / aucs.len() as f32)
    }
}

/// Rebuild the model recorded in `<rundir>/args.json`, load `checkpoint`, and score `split`.
///
/// `datadir` and `batch_size` override the values stored with the run.
pub fn evaluate_checkpoint(
    rundir: &Path,
    checkpoint: &Path,
    split: Split,
    datadir: Option<&Path>,
    batch_size: Option<usize>,
) -> anyhow::Result<EvalReport> {
    let mut args = load_run_args(rundir)?;
    if let Some(dir) = datadir {
        args.datadir = dir.to_path_buf();
    }
    if let Some(bs) = batch_size {
        args.batch_size = bs;
    }

    let index = SplitIndex::load(&args.datadir, split, args.view, &args.extension)
        .map_err(|e| anyhow::anyhow!("failed to load {split} split: {e}"))?;
    let loader = SplitLoader::new(
        index,
        LoaderConfig {
            batch_size: args.batch_size,
            workers: args.workers,
            transform: transform_from_args(&args).without_augmentation(),
            ..Default::default()
        },
    )?;
    let num_classes = loader.num_classes();

    let device = <TrainBackend as Backend>::Device::default();
    let cfg = build_model_config(&args, num_classes)?;
    let model = load_classifier::<TrainBackend>(&cfg, checkpoint, &device).map_err(|e| {
        anyhow::anyhow!("failed to load checkpoint {}: {e}", checkpoint.display())
    })?;

    let loss = ClassificationLoss::select(args.weighted_loss, args.multilabel, loader.class_weights());
    let out = run_eval_epoch(&model, &loader, &loss, &device)?;
    Ok(EvalReport {
        split,
        checkpoint: checkpoint.to_path_buf(),
        exams: out.exams.len(),
        loss: out.avg_loss,
        classes: class_metrics(&out.probs, &out.labels, num_classes),
    })
}
