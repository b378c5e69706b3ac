//! 1-D batch normalization over `[batch, features]` activations.

use ndarray::{Array1, Array2, Axis};

use super::linear::Linear;
use super::state::{require, StateDict, TensorRecord};
use crate::Result;

/// Batch normalization with running statistics
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNorm1d {
    /// Scale (gamma)
    pub weight: Array1<f32>,
    /// Shift (beta)
    pub bias: Array1<f32>,
    /// Running mean
    pub running_mean: Array1<f32>,
    /// Running (unbiased) variance
    pub running_var: Array1<f32>,
    /// Numerical stabilizer
    pub eps: f32,
    /// Running statistics update factor
    pub momentum: f32,
    /// Batches folded into the running statistics
    pub num_batches_tracked: u64,
}

impl BatchNorm1d {
    /// Identity-initialised layer over `features` channels
    pub fn new(features: usize) -> Self {
        Self {
            weight: Array1::ones(features),
            bias: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            eps: 1e-5,
            momentum: 0.1,
            num_batches_tracked: 0,
        }
    }

    /// Number of channels
    pub fn num_features(&self) -> usize {
        self.weight.len()
    }

    /// `sqrt(running_var + eps)` per channel
    pub fn running_std(&self) -> Array1<f32> {
        self.running_var.mapv(|v| (v + self.eps).sqrt())
    }

    /// Per-channel mean and biased variance of a batch
    pub fn batch_moments(x: &Array2<f32>) -> (Array1<f32>, Array1<f32>) {
        let n = x.nrows().max(1) as f32;
        let mean = x.sum_axis(Axis(0)) / n;
        let centered = x - &mean.view().insert_axis(Axis(0));
        let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
        (mean, var)
    }

    /// Fold batch statistics into the running estimates
    ///
    /// `biased_var` is the population variance over `count` samples; the
    /// running estimate stores the unbiased variance.
    pub fn update_running_stats(&mut self, mean: &Array1<f32>, biased_var: &Array1<f32>, count: usize) {
        let correction = if count > 1 {
            count as f32 / (count as f32 - 1.0)
        } else {
            1.0
        };
        let m = self.momentum;
        self.running_mean
            .zip_mut_with(mean, |r, &b| *r = (1.0 - m) * *r + m * b);
        self.running_var
            .zip_mut_with(biased_var, |r, &b| *r = (1.0 - m) * *r + m * b * correction);
        self.num_batches_tracked += 1;
    }

    /// Inference-mode normalization with running statistics
    pub fn forward_eval(&self, x: &Array2<f32>) -> Array2<f32> {
        let scale = &self.weight / &self.running_std();
        let shift = &self.bias - &(&self.running_mean * &scale);
        x * &scale.view().insert_axis(Axis(0)) + &shift.view().insert_axis(Axis(0))
    }

    /// Fold this normalization into the preceding linear layer
    ///
    /// `W' = W * gamma / std`, `b' = (b - mean) * gamma / std + beta`
    pub fn fold_into(&self, linear: &Linear) -> Linear {
        let scale = &self.weight / &self.running_std();
        let weight = &linear.weight * &scale.view().insert_axis(Axis(1));
        let bias = (&linear.bias - &self.running_mean) * &scale + &self.bias;
        Linear::from_parts(weight, bias)
    }

    /// Append tensors under `prefix`
    pub fn save_state(&self, prefix: &str, state: &mut StateDict) {
        state.insert(format!("{prefix}.weight"), TensorRecord::from_array1(&self.weight));
        state.insert(format!("{prefix}.bias"), TensorRecord::from_array1(&self.bias));
        state.insert(
            format!("{prefix}.running_mean"),
            TensorRecord::from_array1(&self.running_mean),
        );
        state.insert(
            format!("{prefix}.running_var"),
            TensorRecord::from_array1(&self.running_var),
        );
        state.insert(
            format!("{prefix}.num_batches_tracked"),
            TensorRecord::scalar(self.num_batches_tracked as f32),
        );
    }

    /// Restore tensors from `prefix`; `num_batches_tracked` is optional
    pub fn load_state(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let n = self.num_features();
        for (field, target) in [
            ("weight", &mut self.weight),
            ("bias", &mut self.bias),
            ("running_mean", &mut self.running_mean),
            ("running_var", &mut self.running_var),
        ] {
            let name = format!("{prefix}.{field}");
            *target = require(state, &name)?.to_array1(&name, n)?;
        }
        let name = format!("{prefix}.num_batches_tracked");
        if let Some(record) = state.get(&name) {
            self.num_batches_tracked = record.to_scalar(&name)? as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_batch_moments() {
        let x = array![[1.0, 10.0], [3.0, 10.0]];
        let (mean, var) = BatchNorm1d::batch_moments(&x);
        assert_abs_diff_eq!(mean, array![2.0, 10.0]);
        assert_abs_diff_eq!(var, array![1.0, 0.0]);
    }

    #[test]
    fn test_running_stats_use_unbiased_variance() {
        let mut bn = BatchNorm1d::new(1);
        bn.update_running_stats(&array![2.0], &array![1.0], 2);
        // mean: 0.9*0 + 0.1*2, var: 0.9*1 + 0.1*(1 * 2/1)
        assert_abs_diff_eq!(bn.running_mean[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(bn.running_var[0], 1.1, epsilon = 1e-6);
        assert_eq!(bn.num_batches_tracked, 1);
    }

    #[test]
    fn test_fold_matches_linear_then_bn() {
        let linear = Linear::from_parts(array![[1.0, -2.0], [0.5, 0.5]], array![0.1, -0.3]);
        let mut bn = BatchNorm1d::new(2);
        bn.weight = array![1.5, 0.5];
        bn.bias = array![0.2, -0.1];
        bn.running_mean = array![0.3, 1.0];
        bn.running_var = array![2.0, 0.25];

        let x = array![[1.0, 2.0], [-1.0, 0.5]];
        let expected = bn.forward_eval(&linear.forward(&x));
        let folded = bn.fold_into(&linear).forward(&x);
        assert_abs_diff_eq!(folded, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_state_round_trip() {
        let mut bn = BatchNorm1d::new(3);
        bn.running_mean = array![1.0, 2.0, 3.0];
        bn.num_batches_tracked = 12;
        let mut state = StateDict::new();
        bn.save_state("bn", &mut state);

        let mut restored = BatchNorm1d::new(3);
        restored.load_state("bn", &state).unwrap();
        assert_eq!(restored, bn);
    }
}
