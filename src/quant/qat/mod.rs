//! Quantization-aware training modules
//!
//! Each feature block keeps linear, batch-norm and ReLU together so the
//! quantizer sees the folded weight it will see after conversion. Training
//! runs an explicit forward pass that records a tape, followed by a backward
//! pass that accumulates gradients into the modules. Fake quantization uses
//! the clamped straight-through estimator.

mod classifier;
mod linear;
mod linear_bn;

#[cfg(test)]
mod tests;

pub use classifier::{QatClassifier, QatTape};
pub use linear::{LinearTape, QatLinear};
pub use linear_bn::{LinearBnTape, QatLinearBnReLU};

use super::qconfig::QConfig;
use crate::models::FloatClassifier;

/// Fuse for QAT and attach fake quantization from `qconfig`
pub fn prepare_qat(model: FloatClassifier, qconfig: &QConfig) -> QatClassifier {
    QatClassifier::from_float(model, qconfig)
}
