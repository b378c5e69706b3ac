//! Fake-quantized linear layer (the classifier head).

use ndarray::{Array1, Array2, Axis};

use crate::nn::{Linear, StateDict};
use crate::optim::Param;
use crate::quant::fake_quantize::FakeQuantize;
use crate::quant::qconfig::QConfig;
use crate::Result;

/// Activations saved by [`QatLinear::forward_train`]
#[derive(Clone, Debug)]
pub struct LinearTape {
    input: Array2<f32>,
    quantized_weight: Array2<f32>,
    pre_activation: Array2<f32>,
}

/// Linear layer with fake-quantized weight and output
#[derive(Clone, Debug, PartialEq)]
pub struct QatLinear {
    pub linear: Linear,
    pub weight_fake_quant: FakeQuantize,
    pub activation_post_process: FakeQuantize,
    grad_weight: Array2<f32>,
    grad_bias: Array1<f32>,
}

impl QatLinear {
    pub fn from_float(linear: Linear, qconfig: &QConfig) -> Self {
        Self {
            grad_weight: Array2::zeros(linear.weight.raw_dim()),
            grad_bias: Array1::zeros(linear.out_features()),
            linear,
            weight_fake_quant: qconfig.weight.build_fake_quant(),
            activation_post_process: qconfig.activation.build_fake_quant(),
        }
    }

    fn affine(&mut self, x: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let quantized_weight = self.weight_fake_quant.forward(&self.linear.weight);
        let z = x.dot(&quantized_weight.t()) + &self.linear.bias.view().insert_axis(Axis(0));
        (quantized_weight, z)
    }

    pub fn forward(&mut self, x: &Array2<f32>) -> Array2<f32> {
        let (_, z) = self.affine(x);
        self.activation_post_process.forward(&z)
    }

    pub fn forward_train(&mut self, x: &Array2<f32>) -> (Array2<f32>, LinearTape) {
        let (quantized_weight, z) = self.affine(x);
        let out = self.activation_post_process.forward(&z);
        (
            out,
            LinearTape {
                input: x.clone(),
                quantized_weight,
                pre_activation: z,
            },
        )
    }

    /// Accumulate parameter gradients and return the input gradient
    pub fn backward(&mut self, tape: &LinearTape, grad_output: &Array2<f32>) -> Array2<f32> {
        let grad_z = self
            .activation_post_process
            .backward_clamped(grad_output, &tape.pre_activation);
        let grad_weight = grad_z.t().dot(&tape.input);
        self.grad_weight += &self
            .weight_fake_quant
            .backward_clamped(&grad_weight, &self.linear.weight);
        self.grad_bias += &grad_z.sum_axis(Axis(0));
        grad_z.dot(&tape.quantized_weight)
    }

    pub fn parameters(&mut self, prefix: &str) -> Vec<Param<'_>> {
        vec![
            Param::new(
                format!("{prefix}.weight"),
                self.linear.weight.view_mut().into_dyn(),
                self.grad_weight.view_mut().into_dyn(),
            ),
            Param::new(
                format!("{prefix}.bias"),
                self.linear.bias.view_mut().into_dyn(),
                self.grad_bias.view_mut().into_dyn(),
            ),
        ]
    }

    pub fn save_state(&self, prefix: &str, state: &mut StateDict, include_parameters: bool) {
        if include_parameters {
            self.linear.save_state(prefix, state);
        }
        self.weight_fake_quant
            .save_state(&format!("{prefix}.weight_fake_quant"), state);
        self.activation_post_process
            .save_state(&format!("{prefix}.activation_post_process"), state);
    }

    pub fn load_state(&mut self, prefix: &str, state: &StateDict, include_parameters: bool) -> Result<()> {
        if include_parameters {
            self.linear.load_state(prefix, state)?;
        }
        self.weight_fake_quant
            .load_state(&format!("{prefix}.weight_fake_quant"), state)?;
        self.activation_post_process
            .load_state(&format!("{prefix}.activation_post_process"), state)?;
        self.grad_weight = Array2::zeros(self.linear.weight.raw_dim());
        self.grad_bias = Array1::zeros(self.linear.out_features());
        Ok(())
    }
}
