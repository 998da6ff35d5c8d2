use clap::Parser;
use training::util::{init_tracing, run_train};
use training::TrainArgs;

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    init_tracing(&args.rundir)?;
    let history = run_train(args)?;
    if let (Some(epoch), Some(loss)) = (history.best_epoch, history.best_val_loss) {
        tracing::info!(best_epoch = epoch, best_val_loss = loss, "training finished");
    }
    Ok(())
}
