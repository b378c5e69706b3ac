//! Fake quantization module with an attached observer.

use ndarray::{Array2, Axis, Zip};

use crate::nn::{require, StateDict, TensorRecord};
use crate::quant::calibration::{Granularity, Observer};
use crate::quant::qparams::{QParams, QuantRange};
use crate::Result;

/// Fake quantization operation with Straight-Through Estimator (STE)
///
/// Holds the observer that tracks the input range and the scale/zero-point
/// derived from it. Observation and fake quantization can be switched off
/// independently, which is how QAT freezes ranges after a few epochs.
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantize {
    /// Range statistics
    pub observer: Observer,
    /// Current scale/zero-point (one per channel for per-channel weights)
    pub qparams: Vec<QParams>,
    /// Whether forward passes update the observer
    pub observer_enabled: bool,
    /// Whether forward passes quantize at all
    pub fake_quant_enabled: bool,
}

impl FakeQuantize {
    /// Create with both observation and fake quantization enabled
    pub fn new(observer: Observer) -> Self {
        Self {
            observer,
            qparams: Vec::new(),
            observer_enabled: true,
            fake_quant_enabled: true,
        }
    }

    /// Integer range of the simulated type
    pub fn range(&self) -> QuantRange {
        self.observer.range()
    }

    /// Check if scale/zero-point have been computed
    pub fn is_initialized(&self) -> bool {
        !self.qparams.is_empty()
    }

    /// Per-tensor scale/zero-point (the first channel's for per-channel)
    pub fn tensor_qparams(&self) -> QParams {
        self.qparams.first().copied().unwrap_or_default()
    }

    /// Resume updating statistics
    pub fn enable_observer(&mut self) {
        self.observer_enabled = true;
    }

    /// Freeze statistics at their current values
    pub fn disable_observer(&mut self) {
        self.observer_enabled = false;
    }

    /// Turn fake quantization on
    pub fn enable_fake_quant(&mut self) {
        self.fake_quant_enabled = true;
    }

    /// Pass inputs through unchanged
    #[cfg(test)]
    pub(crate) fn disable_fake_quant(&mut self) {
        self.fake_quant_enabled = false;
    }

    /// Observe (if enabled), then fake quantize (if enabled)
    pub fn forward(&mut self, input: &Array2<f32>) -> Array2<f32> {
        if self.observer_enabled {
            self.observer.observe(input.view());
            if self.observer.has_data() {
                self.qparams = self.observer.qparams();
            }
        }
        if self.fake_quant_enabled && self.is_initialized() {
            self.apply(input)
        } else {
            input.clone()
        }
    }

    /// Fake quantize with the current parameters, without observing
    pub fn apply(&self, input: &Array2<f32>) -> Array2<f32> {
        let range = self.range();
        let mut out = input.clone();
        match self.channel_qparams(input.nrows()) {
            Some(per_row) => {
                for (mut row, qp) in out.axis_iter_mut(Axis(0)).zip(per_row) {
                    row.mapv_inplace(|x| qp.fake_quantize(x, &range));
                }
            }
            None => {
                let qp = self.tensor_qparams();
                out.mapv_inplace(|x| qp.fake_quantize(x, &range));
            }
        }
        out
    }

    /// Backward pass: Straight-Through Estimator (STE)
    ///
    /// The gradient passes through unchanged:
    /// ∂L/∂x = ∂L/∂y (where y = fake_quantize(x))
    pub fn backward(&self, grad_output: &Array2<f32>) -> Array2<f32> {
        grad_output.clone()
    }

    /// Backward pass with gradient clipping (clamped STE)
    ///
    /// Zeroes gradients where the input fell outside the representable range.
    pub fn backward_clamped(&self, grad_output: &Array2<f32>, input: &Array2<f32>) -> Array2<f32> {
        if !self.fake_quant_enabled || !self.is_initialized() {
            return self.backward(grad_output);
        }
        let range = self.range();
        let mut grad = grad_output.clone();
        match self.channel_qparams(input.nrows()) {
            Some(per_row) => {
                for ((mut g_row, x_row), qp) in grad
                    .axis_iter_mut(Axis(0))
                    .zip(input.axis_iter(Axis(0)))
                    .zip(per_row)
                {
                    let (lo, hi) = qp.representable(&range);
                    Zip::from(&mut g_row).and(&x_row).for_each(|g, &x| {
                        if x < lo || x > hi {
                            *g = 0.0;
                        }
                    });
                }
            }
            None => {
                let (lo, hi) = self.tensor_qparams().representable(&range);
                Zip::from(&mut grad).and(input).for_each(|g, &x| {
                    if x < lo || x > hi {
                        *g = 0.0;
                    }
                });
            }
        }
        grad
    }

    /// Append observer, scale, zero point and switches under `prefix`
    pub fn save_state(&self, prefix: &str, state: &mut StateDict) {
        self.observer.save_state(&format!("{prefix}.activation_post_process"), state);
        let scales: Vec<f32> = self.qparams.iter().map(|qp| qp.scale).collect();
        let zero_points: Vec<f32> = self.qparams.iter().map(|qp| qp.zero_point as f32).collect();
        state.insert(
            format!("{prefix}.scale"),
            TensorRecord {
                shape: vec![scales.len()],
                data: scales,
            },
        );
        state.insert(
            format!("{prefix}.zero_point"),
            TensorRecord {
                shape: vec![zero_points.len()],
                data: zero_points,
            },
        );
        state.insert(
            format!("{prefix}.observer_enabled"),
            TensorRecord::scalar(f32::from(u8::from(self.observer_enabled))),
        );
        state.insert(
            format!("{prefix}.fake_quant_enabled"),
            TensorRecord::scalar(f32::from(u8::from(self.fake_quant_enabled))),
        );
    }

    /// Restore everything written by `save_state`
    pub fn load_state(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        self.observer
            .load_state(&format!("{prefix}.activation_post_process"), state)?;
        let scales = &require(state, &format!("{prefix}.scale"))?.data;
        let zero_points = &require(state, &format!("{prefix}.zero_point"))?.data;
        self.qparams = scales
            .iter()
            .zip(zero_points)
            .map(|(&scale, &zp)| QParams {
                scale,
                zero_point: zp as i32,
            })
            .collect();
        let name = format!("{prefix}.observer_enabled");
        self.observer_enabled = require(state, &name)?.to_scalar(&name)? != 0.0;
        let name = format!("{prefix}.fake_quant_enabled");
        self.fake_quant_enabled = require(state, &name)?.to_scalar(&name)? != 0.0;
        Ok(())
    }

    fn channel_qparams(&self, rows: usize) -> Option<&[QParams]> {
        (self.observer.granularity() == Granularity::PerChannel && self.qparams.len() == rows)
            .then_some(self.qparams.as_slice())
    }
}
