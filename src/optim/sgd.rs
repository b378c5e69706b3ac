//! Stochastic Gradient Descent optimizer

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use super::{Optimizer, Param};

/// Serializable SGD state for checkpoints
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SgdState {
    pub lr: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    /// Momentum buffers keyed by parameter name
    pub momentum_buffers: BTreeMap<String, Vec<f32>>,
}

/// SGD optimizer with momentum and L2 weight decay
///
/// Update rule, per parameter `p` with gradient `g`:
/// ```text
/// g   = g + weight_decay * p
/// buf = momentum * buf + g      (buf = g on the first step)
/// p   = p - lr * buf
/// ```
#[derive(Clone, Debug)]
pub struct SGD {
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: BTreeMap<String, ArrayD<f32>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            weight_decay: 0.0,
            velocities: BTreeMap::new(),
        }
    }

    /// Set the L2 penalty
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }

    /// Snapshot hyperparameters and momentum buffers
    pub fn state(&self) -> SgdState {
        SgdState {
            lr: self.lr,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            momentum_buffers: self
                .velocities
                .iter()
                .map(|(name, buf)| (name.clone(), buf.iter().copied().collect()))
                .collect(),
        }
    }

    /// Restore a snapshot
    ///
    /// Buffers are reshaped lazily against the parameters on the next step.
    pub fn load_state(&mut self, state: SgdState) {
        self.lr = state.lr;
        self.momentum = state.momentum;
        self.weight_decay = state.weight_decay;
        self.velocities = state
            .momentum_buffers
            .into_iter()
            .map(|(name, data)| (name, Array1::from(data).into_dyn()))
            .collect();
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [Param<'_>]) {
        for param in params.iter_mut() {
            let mut grad = param.grad.to_owned();
            if self.weight_decay != 0.0 {
                let wd = self.weight_decay;
                grad.zip_mut_with(&param.value, |g, &p| *g += wd * p);
            }

            let update = if self.momentum != 0.0 {
                let momentum = self.momentum;
                let buf = match self.velocities.remove(&param.name) {
                    Some(buf) if buf.len() == grad.len() => {
                        let mut buf = buf
                            .into_shape_with_order(grad.raw_dim())
                            .unwrap_or_else(|_| grad.clone());
                        buf.zip_mut_with(&grad, |b, &g| *b = momentum * *b + g);
                        buf
                    }
                    _ => grad,
                };
                self.velocities.insert(param.name.clone(), buf.clone());
                buf
            } else {
                grad
            };

            let lr = self.lr;
            param.value.zip_mut_with(&update, |p, &u| *p -= lr * u);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
