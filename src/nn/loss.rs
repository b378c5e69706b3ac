//! Cross Entropy Loss for batched classification

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Cross Entropy Loss over integer class targets
///
/// L = mean_i( -log(softmax(logits_i)[target_i]) )
///
/// # Example
///
/// ```
/// use cuantizar::nn::CrossEntropyLoss;
/// use ndarray::array;
///
/// let logits = array![[2.0, 1.0, 0.5]];
/// let (loss, grad) = CrossEntropyLoss.forward(&logits, &[0]);
/// assert!(loss > 0.0);
/// assert_eq!(grad.dim(), (1, 3));
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Numerically stable softmax of one row
    pub(crate) fn softmax(x: ArrayView1<'_, f32>) -> Array1<f32> {
        let max = x.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exp_x: Array1<f32> = x.mapv(|v| (v - max).exp());
        let sum: f32 = exp_x.sum();
        exp_x / sum
    }

    /// Mean loss and its gradient with respect to the logits
    ///
    /// The gradient is `(softmax - onehot) / batch`.
    pub fn forward(&self, logits: &Array2<f32>, targets: &[usize]) -> (f32, Array2<f32>) {
        assert_eq!(
            logits.nrows(),
            targets.len(),
            "Logits and targets must have same batch size"
        );
        let n = logits.nrows().max(1) as f32;
        let mut grad = Array2::zeros(logits.raw_dim());
        let mut total = 0.0;

        for ((row, mut grad_row), &target) in logits
            .axis_iter(Axis(0))
            .zip(grad.axis_iter_mut(Axis(0)))
            .zip(targets)
        {
            let probs = Self::softmax(row);
            total += -(probs[target] + 1e-10).max(f32::MIN_POSITIVE).ln();
            grad_row.assign(&probs);
            grad_row[target] -= 1.0;
        }

        grad.mapv_inplace(|g| g / n);
        (total / n, grad)
    }
}

/// Count rows whose target is within the top `k` logits, for each `k`
pub fn topk_correct(logits: &Array2<f32>, targets: &[usize], ks: &[usize]) -> Vec<usize> {
    let mut correct = vec![0; ks.len()];
    for (row, &target) in logits.axis_iter(Axis(0)).zip(targets) {
        let target_score = row[target];
        // Rank = number of classes strictly ahead of the target; ties go to lower indices.
        let rank = row
            .iter()
            .enumerate()
            .filter(|&(i, &v)| v > target_score || (v == target_score && i < target))
            .count();
        for (slot, &k) in correct.iter_mut().zip(ks) {
            if rank < k {
                *slot += 1;
            }
        }
    }
    correct
}
