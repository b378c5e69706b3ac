//! ReLU forward and backward.

use ndarray::Array2;

/// Elementwise max(x, 0)
pub fn relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|v| v.max(0.0))
}

/// Gradient of ReLU given the pre-activation input
pub fn relu_backward(grad: &Array2<f32>, pre_activation: &Array2<f32>) -> Array2<f32> {
    let mut out = grad.clone();
    out.zip_mut_with(pre_activation, |g, &x| {
        if x <= 0.0 {
            *g = 0.0;
        }
    });
    out
}
