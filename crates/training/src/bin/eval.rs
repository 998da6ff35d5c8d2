use clap::{Parser, ValueEnum};
use mri_dataset::Split;
use std::path::PathBuf;
use training::args::positive;
use training::util::init_tracing;
use training::{evaluate_checkpoint, EvalReport};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EvalSplit {
    Valid,
    Test,
    Rad,
}

impl From<EvalSplit> for Split {
    fn from(s: EvalSplit) -> Self {
        match s {
            EvalSplit::Valid => Split::Valid,
            EvalSplit::Test => Split::Test,
            EvalSplit::Rad => Split::Rad,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a checkpoint on a held-out split (loss, per-class accuracy and AUC)"
)]
struct Args {
    /// Run directory holding args.json from training.
    #[arg(long)]
    rundir: PathBuf,
    /// Checkpoint to load.
    #[arg(long)]
    checkpoint: PathBuf,
    #[arg(long, value_enum, default_value_t = EvalSplit::Test)]
    split: EvalSplit,
    /// Override the dataset root stored in args.json.
    #[arg(long)]
    datadir: Option<PathBuf>,
    #[arg(long, value_parser = positive())]
    batch_size: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.rundir)?;

    let report = evaluate_checkpoint(
        &args.rundir,
        &args.checkpoint,
        args.split.into(),
        args.datadir.as_deref(),
        args.batch_size,
    )?;
    log_report(&report);

    let out = args.rundir.join(format!("eval_{}.json", report.split));
    std::fs::write(&out, serde_json::to_string_pretty(&report)?)?;
    tracing::info!(path = %out.display(), "wrote evaluation report");
    Ok(())
}

fn log_report(report: &EvalReport) {
    tracing::info!(
        split = %report.split,
        exams = report.exams,
        loss = report.loss,
        mean_auc = ?report.mean_auc(),
        "evaluation"
    );
    for c in &report.classes {
        tracing::info!(
            class = c.class,
            positives = c.positives,
            negatives = c.negatives,
            accuracy = c.accuracy,
            auc = ?c.auc,
            "class metrics"
        );
    }
}
