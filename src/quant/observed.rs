//! Observer insertion for post-training quantization.

use ndarray::Array2;

use super::calibration::Observer;
use super::fuse::{FusedClassifier, FusedLinear};
use super::qconfig::QConfig;
use crate::models::Classify;

/// A fused layer followed by an output activation observer
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedLinear {
    pub layer: FusedLinear,
    pub activation_post_process: Observer,
}

/// Fused classifier instrumented with activation observers
///
/// Running data through it records activation ranges without changing the
/// float outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedClassifier {
    pub arch: String,
    pub image_size: usize,
    /// Recipe used for the observers and, at convert time, the weights
    pub qconfig: QConfig,
    /// Observer on the model input
    pub quant: Observer,
    pub layers: Vec<ObservedLinear>,
}

impl ObservedClassifier {
    /// Float forward pass that records every activation range
    pub fn forward(&mut self, x: &Array2<f32>) -> Array2<f32> {
        self.quant.observe(x.view());
        let mut h = x.clone();
        for observed in &mut self.layers {
            h = observed.layer.forward(&h);
            observed.activation_post_process.observe(h.view());
        }
        h
    }

    /// Batches seen by the input observer
    pub fn num_calibration_batches(&self) -> usize {
        self.quant.num_batches()
    }
}

impl Classify for ObservedClassifier {
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward(inputs)
    }
}

/// Attach observers from `qconfig` to a fused model
pub fn prepare(model: FusedClassifier, qconfig: &QConfig) -> ObservedClassifier {
    let layers = model
        .layers
        .into_iter()
        .map(|layer| ObservedLinear {
            layer,
            activation_post_process: qconfig.activation.build(),
        })
        .collect();
    ObservedClassifier {
        arch: model.arch,
        image_size: model.image_size,
        qconfig: qconfig.clone(),
        quant: qconfig.activation.build(),
        layers,
    }
}
