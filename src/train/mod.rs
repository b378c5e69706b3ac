//! Quantization-aware training, post-training quantization and evaluation
//!
//! [`run`] picks one [`Flow`] from the configuration:
//!
//! - `post_training_quantize`: fuse, calibrate on a training subset, convert,
//!   save `quantized_post_train_model.pth`, evaluate.
//! - `test_only`: evaluate stored quantized weights.
//! - otherwise: QAT for `start_epoch..epochs`, evaluating both the
//!   fake-quantized model and its integer conversion after every epoch and
//!   writing `model_<epoch>.pth` and `checkpoint.pth`.

mod engine;
mod flow;
mod metrics;

#[cfg(test)]
mod tests;

pub use engine::{evaluate, train_one_epoch, EvalReport, TrainStats};
pub use flow::{EpochReport, Flow, RunOutcome};
pub use metrics::{format_duration, MetricLogger, SmoothedValue};

use crate::config::RunConfig;
use crate::distributed::{init_distributed_mode, DistributedInfo, ProcessGroup};
use crate::Result;

/// Validate `config`, join the process group and run the selected flow
pub fn run(config: RunConfig) -> Result<RunOutcome> {
    config.validate()?;
    let (dist, mut group) = init_distributed_mode(&config)?;
    run_in_group(&config, &dist, group.as_mut())
}

/// Run the selected flow inside an existing process group
pub fn run_in_group(
    config: &RunConfig,
    dist: &DistributedInfo,
    group: &mut dyn ProcessGroup,
) -> Result<RunOutcome> {
    config.validate()?;
    match Flow::select(config) {
        Flow::PostTrainingQuantize => flow::post_training_quantize(config, dist, group),
        Flow::TestOnly => flow::test_only(config, dist, group),
        Flow::QuantAwareTraining => flow::quant_aware_training(config, dist, group),
    }
}
