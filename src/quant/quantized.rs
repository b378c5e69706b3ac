//! Integer-only inference model.
//!
//! Activations are unsigned 8-bit levels, weights signed 8-bit symmetric,
//! accumulators 32-bit. Each layer requantizes its accumulator to the next
//! layer's scale with a fixed-point multiplier; floats only appear at the
//! input quantize and the output dequantize.

use std::path::Path;

use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::qparams::{FixedPointMultiplier, QParams, QuantRange};
use crate::io::{read_json, write_json_atomic};
use crate::models::Classify;
use crate::{Error, Result};

/// Quantized `Linear` (optionally followed by ReLU)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedLinear {
    /// `[out, in]` signed weights
    pub weight: Array2<i8>,
    /// One entry per output channel, or a single per-tensor entry
    pub weight_qparams: Vec<QParams>,
    /// Bias in accumulator units (`s_in * s_w`)
    pub bias: Array1<i32>,
    /// Per output channel `s_in * s_w / s_out`
    pub multipliers: Vec<FixedPointMultiplier>,
    /// Quantization of the input activations
    pub input: QParams,
    /// Quantization of the output activations
    pub output: QParams,
    pub output_range: QuantRange,
    /// Clamp outputs at the output zero point
    pub relu: bool,
}

impl QuantizedLinear {
    /// Quantize a float layer given input and output activation parameters
    ///
    /// `weight_qparams` holds one entry per row, or a single entry for the
    /// whole tensor.
    #[allow(clippy::too_many_arguments)]
    pub fn from_float(
        weight: &Array2<f32>,
        bias: &Array1<f32>,
        weight_qparams: Vec<QParams>,
        weight_range: QuantRange,
        input: QParams,
        output: QParams,
        output_range: QuantRange,
        relu: bool,
    ) -> Result<Self> {
        let out_features = weight.nrows();
        if weight_qparams.len() != 1 && weight_qparams.len() != out_features {
            return Err(Error::ShapeMismatch {
                name: "weight_qparams".to_string(),
                expected: vec![out_features],
                actual: vec![weight_qparams.len()],
            });
        }
        if bias.len() != out_features {
            return Err(Error::ShapeMismatch {
                name: "bias".to_string(),
                expected: vec![out_features],
                actual: vec![bias.len()],
            });
        }

        let channel = |o: usize| weight_qparams[if weight_qparams.len() == 1 { 0 } else { o }];
        let q_weight = Array2::from_shape_fn(weight.raw_dim(), |(o, k)| {
            channel(o).quantize(weight[[o, k]], &weight_range) as i8
        });
        let q_bias = Array1::from_shape_fn(out_features, |o| {
            let acc_scale = f64::from(input.scale) * f64::from(channel(o).scale);
            (f64::from(bias[o]) / acc_scale).round() as i32
        });
        let multipliers = (0..out_features)
            .map(|o| {
                FixedPointMultiplier::from_real(
                    f64::from(input.scale) * f64::from(channel(o).scale) / f64::from(output.scale),
                )
            })
            .collect();

        Ok(Self {
            weight: q_weight,
            weight_qparams,
            bias: q_bias,
            multipliers,
            input,
            output,
            output_range,
            relu,
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Integer forward pass over `[batch, in]` activation levels
    pub fn forward(&self, x: &Array2<u8>) -> Array2<u8> {
        let zp_in = self.input.zero_point;
        let zp_out = self.output.zero_point;
        let lo = if self.relu {
            zp_out.max(self.output_range.qmin)
        } else {
            self.output_range.qmin
        };
        let hi = self.output_range.qmax;

        let mut out = Array2::<u8>::zeros((x.nrows(), self.out_features()));
        Zip::from(out.axis_iter_mut(Axis(0)))
            .and(x.axis_iter(Axis(0)))
            .for_each(|mut out_row, x_row| {
                for (o, w_row) in self.weight.axis_iter(Axis(0)).enumerate() {
                    let acc = w_row
                        .iter()
                        .zip(x_row.iter())
                        .fold(self.bias[o], |acc, (&w, &q)| {
                            acc.wrapping_add((i32::from(q) - zp_in) * i32::from(w))
                        });
                    let level = zp_out.saturating_add(self.multipliers[o].apply(acc));
                    out_row[o] = level.clamp(lo, hi) as u8;
                }
            });
        out
    }
}

/// Fully integer classifier produced by `convert`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizedClassifier {
    /// Zoo recipe name
    pub arch: String,
    pub image_size: usize,
    /// Input quantization
    pub input: QParams,
    pub input_range: QuantRange,
    /// Feature layers followed by the classifier layer
    pub layers: Vec<QuantizedLinear>,
}

impl QuantizedClassifier {
    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, QuantizedLinear::in_features)
    }

    pub fn num_classes(&self) -> usize {
        self.layers.last().map_or(0, QuantizedLinear::out_features)
    }

    /// Quantize float inputs to activation levels
    pub fn quantize_input(&self, x: &Array2<f32>) -> Array2<u8> {
        x.mapv(|v| self.input.quantize(v, &self.input_range) as u8)
    }

    /// Run the integer layers and return the output levels
    pub fn forward_levels(&self, x: &Array2<f32>) -> Array2<u8> {
        self.layers
            .iter()
            .fold(self.quantize_input(x), |h, layer| layer.forward(&h))
    }

    /// Float logits: quantize, integer layers, dequantize
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let levels = self.forward_levels(x);
        let output = self.layers.last().map_or(self.input, |l| l.output);
        levels.mapv(|q| output.dequantize(i32::from(q)))
    }

    /// Save as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(self, path)
    }

    /// Load a model saved by [`QuantizedClassifier::save`]
    ///
    /// Requantization exponents outside the shiftable range are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let model: Self = read_json(path)?;
        for (i, layer) in model.layers.iter().enumerate() {
            if let Some(bad) = layer.multipliers.iter().find(|m| !m.is_valid()) {
                return Err(Error::InvalidConfig(format!(
                    "layer {i}: requantization exponent {} outside {:?}",
                    bad.exponent,
                    FixedPointMultiplier::EXPONENT_RANGE
                )));
            }
        }
        Ok(model)
    }
}

impl Classify for QuantizedClassifier {
    fn logits(&mut self, inputs: &Array2<f32>) -> Array2<f32> {
        self.forward(inputs)
    }
}
