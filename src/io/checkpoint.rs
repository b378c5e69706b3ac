//! Training checkpoints

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::save::read_json;
use crate::config::RunConfig;
use crate::nn::StateDict;
use crate::optim::{SgdState, StepLRState};
use crate::quant::QuantizedClassifier;
use crate::Result;

/// Name of the checkpoint overwritten every epoch
pub const LATEST_CHECKPOINT: &str = "checkpoint.pth";

/// Name of the post-training-quantization artifact
pub const PTQ_ARTIFACT: &str = "quantized_post_train_model.pth";

/// Everything needed to resume quantization-aware training
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// QAT model state: parameters, batch-norm buffers, fake-quant state
    pub model: StateDict,
    /// Integer model converted at the end of the epoch
    pub eval_model: QuantizedClassifier,
    pub optimizer: SgdState,
    pub lr_scheduler: StepLRState,
    /// Last completed epoch
    pub epoch: usize,
    /// Settings of the run that wrote this checkpoint
    pub args: RunConfig,
}

impl Checkpoint {
    /// Epoch the resumed run starts from
    pub fn next_epoch(&self) -> usize {
        self.epoch + 1
    }
}

/// `<dir>/model_<epoch>.pth`
pub fn epoch_checkpoint_path(dir: impl AsRef<Path>, epoch: usize) -> PathBuf {
    dir.as_ref().join(format!("model_{epoch}.pth"))
}

/// `<dir>/checkpoint.pth`
pub fn latest_checkpoint_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(LATEST_CHECKPOINT)
}

/// Read a checkpoint written by the training loop
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    read_json(path)
}
