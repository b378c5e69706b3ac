//! Image classifier model zoo
//!
//! Models are stacks of `Linear → BatchNorm1d → ReLU` feature blocks followed
//! by a linear classifier, applied to flattened, normalized RGB images.
//! Pretrained weights are stored as SafeTensors files.

mod classifier;
mod weights;
mod zoo;

pub use classifier::{FeatureBlock, FloatClassifier};
pub use weights::{load_weights, read_float_tensors, save_weights};
pub(crate) use weights::serialize_records;
pub use zoo::{build_classifier, default_weights_path, recipe, resolve_pretrained, ModelRecipe, ZOO};

use ndarray::Array2;

/// Anything that maps a batch of flattened images to class logits
pub trait Classify {
    /// Compute `[batch, classes]` logits
    ///
    /// Takes `&mut self` because observed and fake-quantized models update
    /// their statistics while running.
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32>;
}
