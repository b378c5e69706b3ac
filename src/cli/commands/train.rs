//! Train command implementation

use tracing::info;

use crate::cli::restrict_to_warnings;
use crate::config::{apply_overrides, load_config, RunConfig, TrainArgs};
use crate::distributed::{init_distributed_mode, is_main_process};
use crate::train::{self, RunOutcome};
use crate::Result;

pub fn run_train(args: TrainArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_config(path)?
        }
        None => RunConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    if config.dry_run {
        info!("Dry run - config validated successfully");
        info!("\n{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let (dist, mut group) = init_distributed_mode(&config)?;
    if !is_main_process(group.as_ref()) {
        restrict_to_warnings();
    }
    info!("{config:?}");

    match train::run_in_group(&config, &dist, group.as_mut())? {
        RunOutcome::PostTrainingQuantize { eval, artifact } => {
            info!(
                "Post-training quantized model: Acc@1 {:.3} Acc@5 {:.3}",
                eval.acc1, eval.acc5
            );
            if let Some(path) = artifact {
                info!("Saved {}", path.display());
            }
        }
        RunOutcome::TestOnly { eval } => {
            info!("Acc@1 {:.3} Acc@5 {:.3}", eval.acc1, eval.acc5);
        }
        RunOutcome::QuantAwareTraining { epochs } => {
            if let Some(last) = epochs.last() {
                info!(
                    "Final epoch {}: QAT Acc@1 {:.3}, quantized Acc@1 {:.3}",
                    last.epoch, last.qat.acc1, last.quantized.acc1
                );
            }
        }
    }
    Ok(())
}
