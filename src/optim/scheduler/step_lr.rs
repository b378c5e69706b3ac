//! Step decay learning rate scheduler

use serde::{Deserialize, Serialize};

use super::LRScheduler;
use crate::optim::Optimizer;

/// Serializable scheduler state for checkpoints
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepLRState {
    pub lr_initial: f32,
    pub step_size: usize,
    pub gamma: f32,
    /// Number of completed `step()` calls
    pub last_epoch: usize,
}

/// Step Decay Learning Rate Scheduler
///
/// Multiplies learning rate by gamma every step_size epochs.
///
/// Formula: lr_t = lr_initial * gamma^(floor(epoch / step_size))
#[derive(Clone, Debug, PartialEq)]
pub struct StepLR {
    lr_initial: f32,
    gamma: f32,
    step_size: usize,
    current_epoch: usize,
}

impl StepLR {
    /// Create a new step decay scheduler
    ///
    /// # Arguments
    /// * `lr_initial` - Initial learning rate
    /// * `step_size` - Decay LR every step_size epochs
    /// * `gamma` - Multiplicative factor (e.g., 0.1 for 10x reduction)
    pub fn new(lr_initial: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            lr_initial,
            gamma,
            step_size,
            current_epoch: 0,
        }
    }

    /// Apply the current learning rate to an optimizer
    pub fn apply<O: Optimizer>(&self, optimizer: &mut O) {
        optimizer.set_lr(self.get_lr());
    }

    pub fn last_epoch(&self) -> usize {
        self.current_epoch
    }

    pub fn state(&self) -> StepLRState {
        StepLRState {
            lr_initial: self.lr_initial,
            step_size: self.step_size,
            gamma: self.gamma,
            last_epoch: self.current_epoch,
        }
    }

    pub fn load_state(&mut self, state: StepLRState) {
        self.lr_initial = state.lr_initial;
        self.step_size = state.step_size;
        self.gamma = state.gamma;
        self.current_epoch = state.last_epoch;
    }
}

impl LRScheduler for StepLR {
    fn get_lr(&self) -> f32 {
        if self.step_size == 0 {
            return self.lr_initial;
        }
        let num_decays = self.current_epoch / self.step_size;
        self.lr_initial * self.gamma.powi(num_decays as i32)
    }

    fn step(&mut self) {
        self.current_epoch += 1;
    }
}
