//! Float classifier built from the zoo recipes.

use ndarray::Array2;

use super::Classify;
use crate::nn::{relu, BatchNorm1d, Linear, StateDict};
use crate::Result;

/// One `Linear → BatchNorm1d → ReLU` block
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureBlock {
    pub linear: Linear,
    pub bn: BatchNorm1d,
}

/// Float classifier: feature blocks, then a linear head
#[derive(Clone, Debug, PartialEq)]
pub struct FloatClassifier {
    /// Zoo recipe name
    pub arch: String,
    /// Expected input resolution
    pub image_size: usize,
    /// Feature extractor
    pub features: Vec<FeatureBlock>,
    /// Classification head
    pub classifier: Linear,
}

impl FloatClassifier {
    /// Flattened input width
    pub fn input_dim(&self) -> usize {
        self.features
            .first()
            .map_or(self.classifier.in_features(), |b| b.linear.in_features())
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.classifier.out_features()
    }

    /// Width of the feature extractor output
    pub fn out_channels(&self) -> usize {
        self.classifier.in_features()
    }

    /// Run the feature extractor in inference mode
    pub fn forward_features(&self, x: &Array2<f32>) -> Array2<f32> {
        self.features.iter().fold(x.clone(), |h, block| {
            relu(&block.bn.forward_eval(&block.linear.forward(&h)))
        })
    }

    /// Inference-mode forward pass
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        self.classifier.forward(&self.forward_features(x))
    }

    /// Named tensors in the pretrained-weights layout
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.features.iter().enumerate() {
            block.linear.save_state(&format!("features.{i}.linear"), &mut state);
            block.bn.save_state(&format!("features.{i}.bn"), &mut state);
        }
        self.classifier.save_state("classifier", &mut state);
        state
    }

    /// Load every tensor; shapes must match the current architecture
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for (i, block) in self.features.iter_mut().enumerate() {
            block.linear.load_state(&format!("features.{i}.linear"), state)?;
            block.bn.load_state(&format!("features.{i}.bn"), state)?;
        }
        self.classifier.load_state("classifier", state)
    }

    /// Drop the head and keep the feature extractor
    pub fn into_features(self) -> Vec<FeatureBlock> {
        self.features
    }
}

impl Classify for FloatClassifier {
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward(inputs)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::build_classifier;
    use ndarray::Array2;

    #[test]
    fn test_forward_shape() {
        let model = build_classifier("mlp_tiny", 5, 0).unwrap();
        let x = Array2::zeros((4, model.input_dim()));
        assert_eq!(model.forward(&x).dim(), (4, 5));
        assert_eq!(model.forward_features(&x).dim(), (4, 32));
    }

    #[test]
    fn test_state_dict_names() {
        let model = build_classifier("mlp_small", 2, 0).unwrap();
        let state = model.state_dict();
        assert!(state.contains_key("features.0.linear.weight"));
        assert!(state.contains_key("features.1.bn.running_var"));
        assert!(state.contains_key("classifier.bias"));
    }

    #[test]
    fn test_load_state_dict_copies_weights() {
        let source = build_classifier("mlp_tiny", 3, 1).unwrap();
        let mut target = build_classifier("mlp_tiny", 3, 2).unwrap();
        target.load_state_dict(&source.state_dict()).unwrap();
        assert_eq!(source, target);
    }

    #[test]
    fn test_load_state_dict_rejects_class_mismatch() {
        let source = build_classifier("mlp_tiny", 3, 1).unwrap();
        let mut target = build_classifier("mlp_tiny", 4, 2).unwrap();
        assert!(target.load_state_dict(&source.state_dict()).is_err());
    }
}
