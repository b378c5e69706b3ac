//! Module fusion for post-training quantization.

use ndarray::Array2;

use crate::models::{Classify, FloatClassifier};
use crate::nn::{relu, Linear};

/// A linear layer with batch-norm already folded in, plus optional ReLU
#[derive(Clone, Debug, PartialEq)]
pub struct FusedLinear {
    pub linear: Linear,
    pub relu: bool,
}

impl FusedLinear {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let y = self.linear.forward(x);
        if self.relu {
            relu(&y)
        } else {
            y
        }
    }
}

/// Classifier whose `Linear → BatchNorm → ReLU` blocks are single layers
#[derive(Clone, Debug, PartialEq)]
pub struct FusedClassifier {
    pub arch: String,
    pub image_size: usize,
    /// Fused feature blocks followed by the classifier head
    pub layers: Vec<FusedLinear>,
}

impl FusedClassifier {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.layers
            .iter()
            .fold(x.clone(), |h, layer| layer.forward(&h))
    }
}

impl Classify for FusedClassifier {
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward(inputs)
    }
}

/// Fold every batch-norm into its linear layer using running statistics
///
/// Produces the same outputs as the eval-mode float model.
pub fn fuse_model(model: &FloatClassifier) -> FusedClassifier {
    let mut layers: Vec<FusedLinear> = model
        .features
        .iter()
        .map(|block| FusedLinear {
            linear: block.bn.fold_into(&block.linear),
            relu: true,
        })
        .collect();
    layers.push(FusedLinear {
        linear: model.classifier.clone(),
        relu: false,
    });
    FusedClassifier {
        arch: model.arch.clone(),
        image_size: model.image_size,
        layers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build_classifier;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    #[test]
    fn test_fused_matches_float_model() {
        let mut model = build_classifier("mlp_tiny", 3, 7).unwrap();
        for block in &mut model.features {
            let n = block.bn.num_features();
            block.bn.running_mean = Array1::linspace(-0.5, 0.5, n);
            block.bn.running_var = Array1::linspace(0.5, 2.0, n);
            block.bn.weight = Array1::linspace(0.8, 1.2, n);
        }
        let x = Array2::from_shape_fn((4, model.input_dim()), |(i, j)| {
            ((i * 7 + j) % 11) as f32 / 11.0 - 0.5
        });

        let fused = fuse_model(&model);
        assert_eq!(fused.layers.len(), model.features.len() + 1);
        assert!(!fused.layers.last().unwrap().relu);
        assert_abs_diff_eq!(fused.forward(&x), model.forward(&x), epsilon = 1e-4);
    }
}
