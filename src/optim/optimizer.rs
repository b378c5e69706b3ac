//! Optimizer trait

use ndarray::ArrayViewMutD;

/// A trainable tensor borrowed from a model together with its gradient
#[derive(Debug)]
pub struct Param<'a> {
    /// Dotted state-dict name, e.g. `features.0.linear.weight`
    pub name: String,
    pub value: ArrayViewMutD<'a, f32>,
    pub grad: ArrayViewMutD<'a, f32>,
}

impl<'a> Param<'a> {
    pub fn new(
        name: impl Into<String>,
        value: ArrayViewMutD<'a, f32>,
        grad: ArrayViewMutD<'a, f32>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    /// Number of scalar values
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Trait for optimization algorithms
pub trait Optimizer {
    /// Perform a single optimization step
    ///
    /// Parameters must be passed in the same order on every call.
    fn step(&mut self, params: &mut [Param<'_>]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [Param<'_>]) {
        for param in params {
            param.grad.fill(0.0);
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array1};

    /// Minimal optimizer implementation for testing default trait methods
    struct TestOptimizer {
        learning_rate: f32,
    }

    impl Optimizer for TestOptimizer {
        fn step(&mut self, params: &mut [Param<'_>]) {
            for param in params {
                let lr = self.learning_rate;
                param.value.zip_mut_with(&param.grad, |p, &g| *p -= lr * g);
            }
        }

        fn lr(&self) -> f32 {
            self.learning_rate
        }

        fn set_lr(&mut self, lr: f32) {
            self.learning_rate = lr;
        }
    }

    #[test]
    fn test_optimizer_step_and_zero_grad() {
        let mut opt = TestOptimizer { learning_rate: 0.1 };
        let mut value: Array1<f32> = arr1(&[1.0, 2.0]);
        let mut grad: Array1<f32> = arr1(&[0.5, 1.0]);
        {
            let mut params = [Param::new(
                "w",
                value.view_mut().into_dyn(),
                grad.view_mut().into_dyn(),
            )];
            assert_eq!(params[0].len(), 2);
            opt.step(&mut params);
            opt.zero_grad(&mut params);
        }
        assert!((value[0] - 0.95).abs() < 1e-6);
        assert!((value[1] - 1.9).abs() < 1e-6);
        assert_eq!(grad, arr1(&[0.0, 0.0]));
    }

    #[test]
    fn test_optimizer_set_lr() {
        let mut opt = TestOptimizer { learning_rate: 0.1 };
        opt.set_lr(0.01);
        assert_eq!(opt.lr(), 0.01);
    }
}
