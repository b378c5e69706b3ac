//! Fully connected layer.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use super::state::{require, StateDict, TensorRecord};
use crate::Result;

/// Affine layer `y = x Wᵀ + b` with weight stored as `[out_features, in_features]`
#[derive(Clone, Debug, PartialEq)]
pub struct Linear {
    /// Weight matrix `[out, in]`
    pub weight: Array2<f32>,
    /// Bias vector `[out]`
    pub bias: Array1<f32>,
}

impl Linear {
    /// Create a layer with torch's default initialisation
    ///
    /// Weight and bias are drawn from `U(-1/sqrt(in), 1/sqrt(in))`, which is what
    /// kaiming-uniform with `a = sqrt(5)` reduces to.
    pub fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((out_features, in_features), |_| {
            rng.random_range(-bound..bound)
        });
        let bias = Array1::from_shape_fn(out_features, |_| rng.random_range(-bound..bound));
        Self { weight, bias }
    }

    /// Build from explicit parameters
    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Self {
        Self { weight, bias }
    }

    /// Input width
    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// Output width
    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Forward pass over a `[batch, in]` matrix
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias.view().insert_axis(Axis(0))
    }

    /// Number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Append this layer's tensors under `prefix`
    pub fn save_state(&self, prefix: &str, state: &mut StateDict) {
        state.insert(
            format!("{prefix}.weight"),
            TensorRecord::from_array2(&self.weight),
        );
        state.insert(format!("{prefix}.bias"), TensorRecord::from_array1(&self.bias));
    }

    /// Restore this layer's tensors from `prefix`, keeping the current shape
    pub fn load_state(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let name = format!("{prefix}.weight");
        let (rows, cols) = self.weight.dim();
        self.weight = require(state, &name)?.to_array2(&name, rows, cols)?;
        let name = format!("{prefix}.bias");
        self.bias = require(state, &name)?.to_array1(&name, rows)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_forward_matches_manual_affine() {
        let layer = Linear::from_parts(array![[1.0, 2.0], [0.0, -1.0]], array![0.5, 1.0]);
        let y = layer.forward(&array![[1.0, 1.0], [2.0, 0.0]]);
        assert_eq!(y, array![[3.5, 0.0], [2.5, 1.0]]);
    }

    #[test]
    fn test_init_respects_fan_in_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Linear::new(16, 4, &mut rng);
        let bound = 0.25;
        assert!(layer.weight.iter().all(|w| w.abs() <= bound));
        assert!(layer.bias.iter().all(|b| b.abs() <= bound));
        assert_eq!(layer.num_parameters(), 16 * 4 + 4);
    }

    #[test]
    fn test_state_round_trip_preserves_values() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = Linear::new(3, 2, &mut rng);
        let mut state = StateDict::new();
        layer.save_state("fc", &mut state);

        let mut other = Linear::new(3, 2, &mut rng);
        other.load_state("fc", &state).unwrap();
        assert_abs_diff_eq!(other.weight, layer.weight);
        assert_abs_diff_eq!(other.bias, layer.bias);
    }

    #[test]
    fn test_load_state_rejects_wrong_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = StateDict::new();
        Linear::new(4, 2, &mut rng).save_state("fc", &mut state);
        let mut narrow = Linear::new(3, 2, &mut rng);
        assert!(narrow.load_state("fc", &state).is_err());
    }
}
