//! Fused `Linear → BatchNorm1d → ReLU` block for quantization-aware training.

use ndarray::{Array1, Array2, Axis};

use crate::distributed::ProcessGroup;
use crate::models::FeatureBlock;
use crate::nn::{relu, relu_backward, require, BatchNorm1d, Linear, StateDict, TensorRecord};
use crate::optim::Param;
use crate::quant::fake_quantize::FakeQuantize;
use crate::quant::qconfig::QConfig;
use crate::Result;

/// Activations saved by [`QatLinearBnReLU::forward_train`] for the backward pass
#[derive(Clone, Debug)]
pub struct LinearBnTape {
    input: Array2<f32>,
    scaled_weight: Array2<f32>,
    effective_weight: Array2<f32>,
    normalized: Array2<f32>,
    std: Array1<f32>,
    batch_stats: bool,
    pre_activation: Array2<f32>,
    activation: Array2<f32>,
}

#[derive(Clone, Debug, PartialEq)]
struct Grads {
    weight: Array2<f32>,
    bias: Array1<f32>,
    bn_weight: Array1<f32>,
    bn_bias: Array1<f32>,
}

impl Grads {
    fn zeros(linear: &Linear) -> Self {
        let out = linear.out_features();
        Self {
            weight: Array2::zeros(linear.weight.raw_dim()),
            bias: Array1::zeros(out),
            bn_weight: Array1::zeros(out),
            bn_bias: Array1::zeros(out),
        }
    }
}

/// Linear + batch-norm + ReLU with the batch-norm folded into fake-quantized weights
///
/// The weight seen by the quantizer is `W * gamma / running_std`, the form it
/// will take after conversion. Until [`freeze_bn_stats`](Self::freeze_bn_stats),
/// training uses batch statistics and updates the running estimates.
#[derive(Clone, Debug, PartialEq)]
pub struct QatLinearBnReLU {
    pub linear: Linear,
    pub bn: BatchNorm1d,
    pub weight_fake_quant: FakeQuantize,
    pub activation_post_process: FakeQuantize,
    /// Use running statistics even in training mode
    pub freeze_bn: bool,
    /// Reduce batch statistics across the process group
    pub sync_bn: bool,
    grads: Grads,
}

impl QatLinearBnReLU {
    pub fn from_float(block: FeatureBlock, qconfig: &QConfig) -> Self {
        let grads = Grads::zeros(&block.linear);
        Self {
            linear: block.linear,
            bn: block.bn,
            weight_fake_quant: qconfig.weight.build_fake_quant(),
            activation_post_process: qconfig.activation.build_fake_quant(),
            freeze_bn: false,
            sync_bn: false,
            grads,
        }
    }

    pub fn out_features(&self) -> usize {
        self.linear.out_features()
    }

    pub fn freeze_bn_stats(&mut self) {
        self.freeze_bn = true;
    }

    /// `gamma / running_std`, with zero entries replaced by one
    fn scale_factor(&self) -> Array1<f32> {
        (&self.bn.weight / &self.bn.running_std()).mapv(|s| if s == 0.0 { 1.0 } else { s })
    }

    /// Fake-quantized folded weight scaled back to the unfolded domain
    fn quantized_weights(&mut self) -> (Array2<f32>, Array2<f32>) {
        let scale = self.scale_factor();
        let scale = scale.view().insert_axis(Axis(1));
        let scaled = &self.linear.weight * &scale;
        let effective = self.weight_fake_quant.forward(&scaled) / &scale;
        (scaled, effective)
    }

    fn pre_norm(&self, x: &Array2<f32>, effective_weight: &Array2<f32>) -> Array2<f32> {
        x.dot(&effective_weight.t()) + &self.linear.bias.view().insert_axis(Axis(0))
    }

    /// Inference-mode forward: running statistics, no buffer updates
    pub fn forward(&mut self, x: &Array2<f32>) -> Array2<f32> {
        let (_, effective) = self.quantized_weights();
        let z = self.pre_norm(x, &effective);
        let y = self.bn.forward_eval(&z);
        self.activation_post_process.forward(&relu(&y))
    }

    /// Per-channel mean and biased variance, reduced across ranks when `sync_bn`
    fn batch_statistics(
        &self,
        z: &Array2<f32>,
        group: &mut dyn ProcessGroup,
    ) -> Result<(Array1<f32>, Array1<f32>, usize)> {
        if !self.sync_bn || group.world_size() <= 1 {
            let (mean, var) = BatchNorm1d::batch_moments(z);
            return Ok((mean, var, z.nrows()));
        }
        let channels = z.ncols();
        let sums = z.sum_axis(Axis(0));
        let squares = z.mapv(|v| v * v).sum_axis(Axis(0));
        let mut packed: Vec<f32> = sums.iter().chain(squares.iter()).copied().collect();
        packed.push(z.nrows() as f32);
        group.all_reduce_sum(&mut packed)?;

        let count = packed[2 * channels].max(1.0);
        let mean = Array1::from_iter(packed[..channels].iter().map(|s| s / count));
        let var = Array1::from_iter(
            packed[channels..2 * channels]
                .iter()
                .zip(&mean)
                .map(|(sq, m)| (sq / count - m * m).max(0.0)),
        );
        Ok((mean, var, count as usize))
    }

    /// Training-mode forward pass that records a tape for [`backward`](Self::backward)
    pub fn forward_train(
        &mut self,
        x: &Array2<f32>,
        group: &mut dyn ProcessGroup,
    ) -> Result<(Array2<f32>, LinearBnTape)> {
        let (scaled_weight, effective_weight) = self.quantized_weights();
        let z = self.pre_norm(x, &effective_weight);

        let (mean, std, batch_stats) = if self.freeze_bn {
            (self.bn.running_mean.clone(), self.bn.running_std(), false)
        } else {
            let (mean, var, count) = self.batch_statistics(&z, group)?;
            self.bn.update_running_stats(&mean, &var, count);
            let eps = self.bn.eps;
            (mean, var.mapv(|v| (v + eps).sqrt()), true)
        };

        let normalized =
            (&z - &mean.view().insert_axis(Axis(0))) / &std.view().insert_axis(Axis(0));
        let pre_activation = &normalized * &self.bn.weight.view().insert_axis(Axis(0))
            + &self.bn.bias.view().insert_axis(Axis(0));
        let activation = relu(&pre_activation);
        let out = self.activation_post_process.forward(&activation);

        Ok((
            out,
            LinearBnTape {
                input: x.clone(),
                scaled_weight,
                effective_weight,
                normalized,
                std,
                batch_stats,
                pre_activation,
                activation,
            },
        ))
    }

    /// Accumulate parameter gradients and return the input gradient
    pub fn backward(
        &mut self,
        tape: &LinearBnTape,
        grad_output: &Array2<f32>,
        group: &mut dyn ProcessGroup,
    ) -> Result<Array2<f32>> {
        let grad_act = self
            .activation_post_process
            .backward_clamped(grad_output, &tape.activation);
        let grad_y = relu_backward(&grad_act, &tape.pre_activation);

        self.grads.bn_weight += &(&grad_y * &tape.normalized).sum_axis(Axis(0));
        self.grads.bn_bias += &grad_y.sum_axis(Axis(0));

        let grad_norm = &grad_y * &self.bn.weight.view().insert_axis(Axis(0));
        let std = tape.std.view().insert_axis(Axis(0));
        let grad_z = if tape.batch_stats {
            let channels = grad_norm.ncols();
            let sum_grad = grad_norm.sum_axis(Axis(0));
            let sum_grad_dot = (&grad_norm * &tape.normalized).sum_axis(Axis(0));
            let mut packed: Vec<f32> = sum_grad.iter().chain(sum_grad_dot.iter()).copied().collect();
            packed.push(grad_norm.nrows() as f32);
            if self.sync_bn && group.world_size() > 1 {
                group.all_reduce_sum(&mut packed)?;
            }
            let count = packed[2 * channels].max(1.0);
            let mean_grad = Array1::from_iter(packed[..channels].iter().map(|s| s / count));
            let mean_grad_dot = Array1::from_iter(
                packed[channels..2 * channels].iter().map(|s| s / count),
            );
            (&grad_norm
                - &mean_grad.view().insert_axis(Axis(0))
                - &(&tape.normalized * &mean_grad_dot.view().insert_axis(Axis(0))))
                / &std
        } else {
            &grad_norm / &std
        };

        let grad_weight = grad_z.t().dot(&tape.input);
        self.grads.weight += &self
            .weight_fake_quant
            .backward_clamped(&grad_weight, &tape.scaled_weight);
        self.grads.bias += &grad_z.sum_axis(Axis(0));

        Ok(grad_z.dot(&tape.effective_weight))
    }

    /// Trainable tensors with their accumulated gradients
    pub fn parameters(&mut self, prefix: &str) -> Vec<Param<'_>> {
        vec![
            Param::new(
                format!("{prefix}.linear.weight"),
                self.linear.weight.view_mut().into_dyn(),
                self.grads.weight.view_mut().into_dyn(),
            ),
            Param::new(
                format!("{prefix}.linear.bias"),
                self.linear.bias.view_mut().into_dyn(),
                self.grads.bias.view_mut().into_dyn(),
            ),
            Param::new(
                format!("{prefix}.bn.weight"),
                self.bn.weight.view_mut().into_dyn(),
                self.grads.bn_weight.view_mut().into_dyn(),
            ),
            Param::new(
                format!("{prefix}.bn.bias"),
                self.bn.bias.view_mut().into_dyn(),
                self.grads.bn_bias.view_mut().into_dyn(),
            ),
        ]
    }

    /// Batch-norm folded into the linear layer, for conversion
    pub fn fold(&self) -> Linear {
        self.bn.fold_into(&self.linear)
    }

    /// Append parameters (optionally) and buffers under `prefix`
    pub fn save_state(&self, prefix: &str, state: &mut StateDict, include_parameters: bool) {
        if include_parameters {
            self.linear.save_state(&format!("{prefix}.linear"), state);
            state.insert(format!("{prefix}.bn.weight"), TensorRecord::from_array1(&self.bn.weight));
            state.insert(format!("{prefix}.bn.bias"), TensorRecord::from_array1(&self.bn.bias));
        }
        state.insert(
            format!("{prefix}.bn.running_mean"),
            TensorRecord::from_array1(&self.bn.running_mean),
        );
        state.insert(
            format!("{prefix}.bn.running_var"),
            TensorRecord::from_array1(&self.bn.running_var),
        );
        state.insert(
            format!("{prefix}.bn.num_batches_tracked"),
            TensorRecord::scalar(self.bn.num_batches_tracked as f32),
        );
        self.weight_fake_quant
            .save_state(&format!("{prefix}.weight_fake_quant"), state);
        self.activation_post_process
            .save_state(&format!("{prefix}.activation_post_process"), state);
        state.insert(
            format!("{prefix}.freeze_bn"),
            TensorRecord::scalar(f32::from(u8::from(self.freeze_bn))),
        );
    }

    /// Restore what [`save_state`](Self::save_state) wrote
    pub fn load_state(&mut self, prefix: &str, state: &StateDict, include_parameters: bool) -> Result<()> {
        let n = self.out_features();
        if include_parameters {
            self.linear.load_state(&format!("{prefix}.linear"), state)?;
            let name = format!("{prefix}.bn.weight");
            self.bn.weight = require(state, &name)?.to_array1(&name, n)?;
            let name = format!("{prefix}.bn.bias");
            self.bn.bias = require(state, &name)?.to_array1(&name, n)?;
        }
        let name = format!("{prefix}.bn.running_mean");
        self.bn.running_mean = require(state, &name)?.to_array1(&name, n)?;
        let name = format!("{prefix}.bn.running_var");
        self.bn.running_var = require(state, &name)?.to_array1(&name, n)?;
        let name = format!("{prefix}.bn.num_batches_tracked");
        self.bn.num_batches_tracked = require(state, &name)?.to_scalar(&name)? as u64;
        self.weight_fake_quant
            .load_state(&format!("{prefix}.weight_fake_quant"), state)?;
        self.activation_post_process
            .load_state(&format!("{prefix}.activation_post_process"), state)?;
        let name = format!("{prefix}.freeze_bn");
        self.freeze_bn = require(state, &name)?.to_scalar(&name)? != 0.0;
        self.grads = Grads::zeros(&self.linear);
        Ok(())
    }
}
