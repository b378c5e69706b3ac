//! Optimizers for training neural networks

mod optimizer;
mod scheduler;
mod sgd;

pub use optimizer::{Optimizer, Param};
pub use scheduler::{LRScheduler, StepLR, StepLRState};
pub use sgd::{SgdState, SGD};
