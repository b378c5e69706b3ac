//! Conversion of observed and QAT models to integer models.

use tracing::debug;

use super::calibration::Observer;
use super::fake_quantize::FakeQuantize;
use super::observed::ObservedClassifier;
use super::qat::QatClassifier;
use super::qparams::{QParams, QuantRange};
use super::quantized::{QuantizedClassifier, QuantizedLinear};
use crate::nn::Linear;
use crate::{Error, Result};

fn observed_qparams(observer: &Observer, name: &str) -> Result<QParams> {
    if !observer.has_data() {
        return Err(Error::InvalidConfig(format!(
            "observer '{name}' has not seen any data; calibrate before converting"
        )));
    }
    Ok(observer.qparams().first().copied().unwrap_or_default())
}

fn fake_quant_qparams(fake_quant: &FakeQuantize, name: &str) -> Result<QParams> {
    if !fake_quant.is_initialized() {
        return Err(Error::InvalidConfig(format!(
            "fake quantizer '{name}' has no scale yet; run at least one batch before converting"
        )));
    }
    Ok(fake_quant.tensor_qparams())
}

struct ActivationQuant {
    qparams: QParams,
    range: QuantRange,
}

/// Convert a calibrated PTQ model
///
/// Weight parameters come from fresh weight observers run over the fused
/// weights; activation parameters from the calibrated observers.
pub fn convert(model: &ObservedClassifier) -> Result<QuantizedClassifier> {
    let input = ActivationQuant {
        qparams: observed_qparams(&model.quant, "quant")?,
        range: model.quant.range(),
    };
    let mut layers = Vec::with_capacity(model.layers.len());
    let mut previous = input.qparams;
    for (i, observed) in model.layers.iter().enumerate() {
        let mut weight_observer = model.qconfig.weight.build();
        weight_observer.observe(observed.layer.linear.weight.view());
        let output = observed_qparams(&observed.activation_post_process, &format!("layers.{i}"))?;
        let layer = QuantizedLinear::from_float(
            &observed.layer.linear.weight,
            &observed.layer.linear.bias,
            weight_observer.qparams(),
            weight_observer.range(),
            previous,
            output,
            observed.activation_post_process.range(),
            observed.layer.relu,
        )?;
        debug!(
            "converted layer {i}: {} -> {}, output scale {:.6}",
            layer.in_features(),
            layer.out_features(),
            output.scale
        );
        previous = output;
        layers.push(layer);
    }
    Ok(QuantizedClassifier {
        arch: model.arch.clone(),
        image_size: model.image_size,
        input: input.qparams,
        input_range: input.range,
        layers,
    })
}

fn convert_layer(
    linear: &Linear,
    weight_fake_quant: &FakeQuantize,
    activation: &FakeQuantize,
    input: QParams,
    relu: bool,
    name: &str,
) -> Result<QuantizedLinear> {
    // Run the weight through a copy so frozen parameters stay frozen
    let mut weight_fake_quant = weight_fake_quant.clone();
    weight_fake_quant.forward(&linear.weight);
    if !weight_fake_quant.is_initialized() {
        return Err(Error::InvalidConfig(format!(
            "weight quantizer of '{name}' is not initialized"
        )));
    }
    QuantizedLinear::from_float(
        &linear.weight,
        &linear.bias,
        weight_fake_quant.qparams.clone(),
        weight_fake_quant.range(),
        input,
        fake_quant_qparams(activation, name)?,
        activation.range(),
        relu,
    )
}

/// Convert a QAT model, folding batch-norm with its running statistics
pub fn convert_qat(model: &QatClassifier) -> Result<QuantizedClassifier> {
    let input = ActivationQuant {
        qparams: fake_quant_qparams(&model.quant, "quant")?,
        range: model.quant.range(),
    };
    let mut layers = Vec::with_capacity(model.features.len() + 1);
    let mut previous = input.qparams;
    for (i, block) in model.features.iter().enumerate() {
        let layer = convert_layer(
            &block.fold(),
            &block.weight_fake_quant,
            &block.activation_post_process,
            previous,
            true,
            &format!("features.{i}"),
        )?;
        previous = layer.output;
        layers.push(layer);
    }
    layers.push(convert_layer(
        &model.classifier.linear,
        &model.classifier.weight_fake_quant,
        &model.classifier.activation_post_process,
        previous,
        false,
        "classifier",
    )?);
    Ok(QuantizedClassifier {
        arch: model.arch.clone(),
        image_size: model.image_size,
        input: input.qparams,
        input_range: input.range,
        layers,
    })
}
