//! Learning rate schedulers
//!
//! `StepLR` multiplies the learning rate by `gamma` every `step_size` epochs.

mod step_lr;


pub use step_lr::{StepLR, StepLRState};

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Step the scheduler (typically called after each epoch or batch)
    fn step(&mut self);
}
