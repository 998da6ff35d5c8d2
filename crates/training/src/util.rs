use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, RmsPropConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::ElementConversion;
use models::{MriClassifier, MriClassifierConfig};
use mri_dataset::{
    LoaderConfig, Split, SplitIndex, SplitLoader, View, VolumeTransform, VolumeTransformBuilder,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::args::{BackendKind, OptimizerKind, TrainArgs};
use crate::checkpoint::{checkpoint_name, load_into, save_classifier};
use crate::loss::ClassificationLoss;
use crate::plot::plot_losses;
use crate::schedule::{PlateauConfig, ReduceLrOnPlateau};
use crate::TrainBackend;

pub type ADBackend = Autodiff<TrainBackend>;

/// Exams kept per split with `--toy`.
pub const TOY_EXAMS: usize = 16;

pub const ARGS_FILE: &str = "args.json";
pub const HISTORY_FILE: &str = "history.json";
pub const LOG_FILE: &str = "log.txt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Counted from 1.
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    /// Learning rate used during this epoch.
    pub learning_rate: f64,
    pub checkpoint: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainHistory {
    pub records: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f32>,
}

impl TrainHistory {
    pub fn push(&mut self, record: EpochRecord) {
        let improved = self
            .best_val_loss
            .map_or(true, |best| record.val_loss < best);
        if improved && record.val_loss.is_finite() {
            self.best_val_loss = Some(record.val_loss);
            self.best_epoch = Some(record.epoch);
        }
        self.records.push(record);
    }

    pub fn train_losses(&self) -> Vec<f32> {
        self.records.iter().map(|r| r.train_loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f32> {
        self.records.iter().map(|r| r.val_loss).collect()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Level for both log sinks. `--verbose` raises per-batch losses to INFO instead of
/// lowering this filter.
pub const LOG_LEVEL: LevelFilter = LevelFilter::INFO;

/// Plain-text layer writing to `file`, filtered at [`LOG_LEVEL`].
pub fn file_layer<S>(file: fs::File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(LOG_LEVEL)
}

/// Install a stdout layer and a plain-text copy of the log at `<rundir>/log.txt`.
///
/// Returns without error when a global subscriber is already set.
pub fn init_tracing(rundir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(rundir)?;
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(rundir.join(LOG_FILE))?;
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(LOG_LEVEL);
    if tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer(file))
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

/// Create the run directory (and `plots/` with `--plot`) and write `args.json`.
pub fn prepare_run_dir(args: &TrainArgs) -> anyhow::Result<()> {
    fs::create_dir_all(&args.rundir).map_err(|e| {
        anyhow::anyhow!("failed to create run dir {}: {e}", args.rundir.display())
    })?;
    if args.plot {
        fs::create_dir_all(args.rundir.join("plots"))?;
    }
    let path = args.rundir.join(ARGS_FILE);
    fs::write(&path, serde_json::to_string_pretty(args)?)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
    Ok(())
}

pub fn load_run_args(rundir: &Path) -> anyhow::Result<TrainArgs> {
    let path = rundir.join(ARGS_FILE);
    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// All splits must agree on the class count; returns it.
pub fn ensure_consistent_classes(counts: &[(Split, usize)]) -> anyhow::Result<usize> {
    let Some((_, first)) = counts.first() else {
        anyhow::bail!("no data splits loaded");
    };
    if counts.iter().any(|(_, k)| k != first) {
        let detail: Vec<String> = counts.iter().map(|(s, k)| format!("{s}={k}")).collect();
        anyhow::bail!(
            "different number of classes in data splits ({})",
            detail.join(", ")
        );
    }
    Ok(*first)
}

pub fn transform_from_args(args: &TrainArgs) -> VolumeTransform {
    VolumeTransformBuilder::new()
        .scale(args.scale)
        .fix_slices(args.fix_slices())
        .horizontal_flip(args.horizontal_flip)
        .rotate(args.rotate)
        .shift(args.shift)
        .reverse(args.reverse)
        .normalization(args.normalize)
        .rgb(args.rgb)
        .build()
}

pub struct SplitLoaders {
    pub train: SplitLoader,
    pub valid: SplitLoader,
    pub test: SplitLoader,
    pub rad: Option<SplitLoader>,
}

impl SplitLoaders {
    pub fn class_counts(&self) -> Vec<(Split, usize)> {
        let mut counts = vec![
            (Split::Train, self.train.num_classes()),
            (Split::Valid, self.valid.num_classes()),
            (Split::Test, self.test.num_classes()),
        ];
        if let Some(rad) = &self.rad {
            counts.push((Split::Rad, rad.num_classes()));
        }
        counts
    }
}

fn load_index(args: &TrainArgs, split: Split) -> anyhow::Result<SplitIndex> {
    let mut index = SplitIndex::load(&args.datadir, split, args.view, &args.extension)
        .map_err(|e| anyhow::anyhow!("failed to load {split} split: {e}"))?;
    if args.toy {
        index.truncate(TOY_EXAMS);
    }
    Ok(index)
}

/// Train shuffles and augments; the other splits keep their order untouched.
pub fn build_loaders(args: &TrainArgs) -> anyhow::Result<SplitLoaders> {
    let train_cfg = LoaderConfig {
        batch_size: args.batch_size,
        shuffle: true,
        augment: true,
        seed: Some(args.seed),
        workers: args.workers,
        transform: transform_from_args(args),
    };
    let eval_cfg = train_cfg.for_eval();

    let train = SplitLoader::new(load_index(args, Split::Train)?, train_cfg)?;
    let valid = SplitLoader::new(load_index(args, Split::Valid)?, eval_cfg.clone())?;
    let test = SplitLoader::new(load_index(args, Split::Test)?, eval_cfg.clone())?;
    let rad = match SplitIndex::load_optional(&args.datadir, Split::Rad, args.view, &args.extension)? {
        Some(mut index) => {
            if args.toy {
                index.truncate(TOY_EXAMS);
            }
            Some(SplitLoader::new(index, eval_cfg)?)
        }
        None => None,
    };

    tracing::info!(
        train = train.len(),
        valid = valid.len(),
        test = test.len(),
        rad = rad.as_ref().map_or(0, |r| r.len()),
        transform = %train.config().transform.describe(),
        "loaded splits"
    );
    Ok(SplitLoaders {
        train,
        valid,
        test,
        rad,
    })
}

pub fn build_model_config(args: &TrainArgs, num_classes: usize) -> anyhow::Result<MriClassifierConfig> {
    if args.model.feature_map_size(args.scale as usize).is_none() {
        anyhow::bail!(
            "--scale {} is too small for the {} encoder",
            args.scale,
            args.model.name()
        );
    }
    let in_channels = if args.rgb { 3 } else { 1 };
    Ok(MriClassifierConfig::new(args.model, in_channels, num_classes)
        .with_aggregation(args.seq)
        .with_hidden_dim(args.hidden_dim())
        .with_dropout(args.dropout))
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainHistory> {
    if args.view == View::All {
        anyhow::bail!("multiview training is not implemented");
    }
    validate_backend_choice(args.backend)?;
    prepare_run_dir(&args)?;

    tracing::info!(run = %args.run_name(), datadir = %args.datadir.display(), "starting run");
    let device = <ADBackend as Backend>::Device::default();
    <ADBackend as Backend>::seed(args.seed);

    let loaders = build_loaders(&args)?;
    let num_classes = ensure_consistent_classes(&loaders.class_counts())?;
    tracing::info!(num_classes, "class count");

    let model_cfg = build_model_config(&args, num_classes)?;
    let mut model = model_cfg.init::<ADBackend>(&device);
    if let Some(path) = &args.pretrained {
        model = load_into(model, path, &device).map_err(|e| {
            anyhow::anyhow!("failed to load pretrained weights {}: {e}", path.display())
        })?;
        tracing::info!(path = %path.display(), "initialized from checkpoint");
    }
    tracing::info!(
        model = args.model.name(),
        aggregation = ?model_cfg.aggregation,
        hidden_dim = model_cfg.hidden_dim,
        "built model"
    );

    let decay = Some(WeightDecayConfig::new(args.weight_decay));
    match args.optimizer {
        OptimizerKind::Adam => {
            let optim = AdamConfig::new()
                .with_weight_decay(decay)
                .init::<ADBackend, MriClassifier<ADBackend>>();
            fit(&args, &loaders, model, optim, &device)
        }
        OptimizerKind::Rmsprop => {
            let optim = RmsPropConfig::new()
                .with_weight_decay(decay)
                .init::<ADBackend, MriClassifier<ADBackend>>();
            fit(&args, &loaders, model, optim, &device)
        }
    }
}

fn fit<O>(
    args: &TrainArgs,
    loaders: &SplitLoaders,
    mut model: MriClassifier<ADBackend>,
    mut optim: O,
    device: &<ADBackend as Backend>::Device,
) -> anyhow::Result<TrainHistory>
where
    O: Optimizer<MriClassifier<ADBackend>, ADBackend>,
{
    let train_loss = ClassificationLoss::select(
        args.weighted_loss,
        args.multilabel,
        loaders.train.class_weights(),
    );
    let valid_loss = ClassificationLoss::select(
        args.weighted_loss,
        args.multilabel,
        loaders.valid.class_weights(),
    );
    tracing::info!(loss = train_loss.name(), "selected loss");

    let mut scheduler = ReduceLrOnPlateau::new(
        args.learning_rate,
        PlateauConfig {
            factor: args.factor,
            patience: args.max_patience,
            ..Default::default()
        },
    )?;

    let mut history = TrainHistory::default();
    let started = Instant::now();
    for epoch in 0..args.epochs {
        let lr = scheduler.lr();
        tracing::info!(
            epoch = epoch + 1,
            elapsed_s = started.elapsed().as_secs(),
            lr,
            "starting epoch"
        );

        let (trained, train_avg) = run_train_epoch(
            model,
            &mut optim,
            &loaders.train,
            &train_loss,
            epoch,
            lr,
            args.verbose,
            device,
        )?;
        model = trained;
        tracing::info!(epoch = epoch + 1, train_loss = train_avg, "train loss");

        let valid = run_eval_epoch::<TrainBackend>(
            &model.valid(),
            &loaders.valid,
            &valid_loss,
            device,
        )?;
        tracing::info!(epoch = epoch + 1, val_loss = valid.avg_loss, "valid loss");

        let ckpt = save_classifier(
            &model,
            &args
                .rundir
                .join(checkpoint_name(valid.avg_loss, train_avg, epoch + 1)),
        )?;
        history.push(EpochRecord {
            epoch: epoch + 1,
            train_loss: train_avg,
            val_loss: valid.avg_loss,
            learning_rate: lr,
            checkpoint: ckpt.clone(),
        });

        if args.plot {
            plot_losses(
                &args.rundir.join("plots").join("loss.png"),
                &history.train_losses(),
                &history.val_losses(),
            )?;
        }
        scheduler.step(valid.avg_loss as f64);
        history.save(&args.rundir.join(HISTORY_FILE))?;
        tracing::info!(
            epoch = epoch + 1,
            train_loss = train_avg,
            val_loss = valid.avg_loss,
            best_val_loss = ?history.best_val_loss,
            checkpoint = %ckpt.display(),
            "epoch complete"
        );
    }
    if args.epochs == 0 {
        history.save(&args.rundir.join(HISTORY_FILE))?;
    }
    Ok(history)
}

fn average(total: f32, batches: usize) -> f32 {
    if batches > 0 {
        total / batches as f32
    } else {
        0.0
    }
}

/// One pass over `loader` with gradient updates; returns the model and mean batch loss.
#[allow(clippy::too_many_arguments)]
pub fn run_train_epoch<B, O>(
    mut model: MriClassifier<B>,
    optim: &mut O,
    loader: &SplitLoader,
    loss_fn: &ClassificationLoss,
    epoch: usize,
    lr: f64,
    verbose: bool,
    device: &B::Device,
) -> anyhow::Result<(MriClassifier<B>, f32)>
where
    B: AutodiffBackend,
    O: Optimizer<MriClassifier<B>, B>,
{
    let mut total = 0.0f32;
    let mut batches = 0usize;
    let mut iter = loader.iter(epoch);
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let logits = model.forward(batch.volumes);
        let loss = loss_fn.forward(logits, batch.labels);
        let value = loss.clone().into_scalar().elem::<f32>();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        total += value;
        batches += 1;
        if verbose {
            tracing::info!(batch = batches, loss = value, "train batch");
        } else {
            tracing::debug!(batch = batches, loss = value, "train batch");
        }
    }
    Ok((model, average(total, batches)))
}

/// Predictions collected by [`run_eval_epoch`]; `probs` and `labels` are row-major `[N, K]`.
#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    pub avg_loss: f32,
    pub exams: Vec<String>,
    pub probs: Vec<f32>,
    pub labels: Vec<f32>,
}

/// Forward-only pass over `loader`.
pub fn run_eval_epoch<B: Backend>(
    model: &MriClassifier<B>,
    loader: &SplitLoader,
    loss_fn: &ClassificationLoss,
    device: &B::Device,
) -> anyhow::Result<EvalOutput> {
    let mut out = EvalOutput::default();
    let mut total = 0.0f32;
    let mut batches = 0usize;
    let mut iter = loader.iter(0);
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let logits = model.forward(batch.volumes);
        let loss = loss_fn.forward(logits.clone(), batch.labels.clone());
        total += loss.into_scalar().elem::<f32>();
        batches += 1;

        let probs = sigmoid(logits)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read predictions: {e:?}"))?;
        let labels = batch
            .labels
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("failed to read labels: {e:?}"))?;
        out.probs.extend(probs);
        out.labels.extend(labels);
        out.exams.extend(batch.exams);
    }
    out.avg_loss = average(total, batches);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, val_loss: f32) -> EpochRecord {
        EpochRecord {
            epoch,
            train_loss: 1.0,
            val_loss,
            learning_rate: 1e-3,
            checkpoint: PathBuf::from(format!("epoch{epoch}.bin")),
        }
    }

    #[test]
    fn history_tracks_best_epoch() {
        let mut h = TrainHistory::default();
        h.push(record(1, 0.9));
        h.push(record(2, 0.7));
        h.push(record(3, 0.8));
        assert_eq!(h.best_epoch, Some(2));
        assert_eq!(h.best_val_loss, Some(0.7));
        assert_eq!(h.val_losses(), vec![0.9, 0.7, 0.8]);
    }

    #[test]
    fn nan_loss_never_becomes_best() {
        let mut h = TrainHistory::default();
        h.push(record(1, f32::NAN));
        assert_eq!(h.best_epoch, None);
        h.push(record(2, 0.5));
        assert_eq!(h.best_epoch, Some(2));
    }

    #[test]
    fn mismatched_class_counts_rejected() {
        let err = ensure_consistent_classes(&[(Split::Train, 3), (Split::Valid, 2)])
            .unwrap_err()
            .to_string();
        assert!(err.contains("different number of classes in data splits"));
        assert_eq!(
            ensure_consistent_classes(&[(Split::Train, 3), (Split::Test, 3)]).unwrap(),
            3
        );
    }

    #[test]
    fn wgpu_requires_feature() {
        if !cfg!(feature = "backend-wgpu") {
            assert!(validate_backend_choice(BackendKind::Wgpu).is_err());
        }
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }

    #[test]
    fn log_file_keeps_info_and_drops_debug() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(LOG_FILE);
        let file = fs::File::create(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(file_layer(file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(batch = 1, loss = 0.5, "train batch");
            tracing::debug!(exams = 3, "indexed split");
        });
        let log = fs::read_to_string(&path).unwrap();
        assert!(log.contains("train batch"), "{log}");
        assert!(!log.contains("indexed split"), "{log}");
    }

    #[test]
    fn history_round_trips_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut h = TrainHistory::default();
        h.push(record(1, 0.4));
        let path = tmp.path().join(HISTORY_FILE);
        h.save(&path).unwrap();
        assert_eq!(TrainHistory::load(&path).unwrap(), h);
    }
}
