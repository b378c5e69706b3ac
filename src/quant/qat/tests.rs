//! Tests for quantization-aware training modules

use super::*;
use crate::distributed::LocalGroup;
use crate::models::build_classifier;
use crate::nn::CrossEntropyLoss;
use crate::optim::{Optimizer, SGD};
use crate::quant::{convert_qat, Backend, QConfig};
use ndarray::Array2;

fn batch(rows: usize, cols: usize, offset: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        (((i + offset) * 37 + j * 13) % 29) as f32 / 14.5 - 1.0
    })
}

fn targets(rows: usize, classes: usize) -> Vec<usize> {
    (0..rows).map(|i| i % classes).collect()
}

fn tiny_qat(backend: Backend) -> QatClassifier {
    let model = build_classifier("mlp_tiny", 3, 11).unwrap();
    prepare_qat(model, &QConfig::qat(backend))
}

fn loss_of(model: &QatClassifier, x: &Array2<f32>, y: &[usize]) -> f32 {
    let mut model = model.clone();
    let (logits, _) = model.forward_train(x, &mut LocalGroup).unwrap();
    CrossEntropyLoss.forward(&logits, y).0
}

#[test]
fn test_prepare_qat_starts_in_training_mode() {
    let model = tiny_qat(Backend::Qnnpack);
    assert!(model.is_training());
    assert_eq!(model.features.len(), 1);
    assert_eq!(model.num_classes(), 3);
    assert!(!model.quant.is_initialized());
}

#[test]
fn test_gradients_match_finite_differences() {
    let mut model = tiny_qat(Backend::Qnnpack);
    model.disable_fake_quant();
    let x = batch(6, model.input_dim(), 0);
    let y = targets(6, 3);

    let (logits, tape) = model.forward_train(&x, &mut LocalGroup).unwrap();
    let (_, grad_logits) = CrossEntropyLoss.forward(&logits, &y);
    let mut analytic = model.clone();
    analytic.backward(&tape, &grad_logits, &mut LocalGroup).unwrap();
    let grads: Vec<(String, Vec<f32>)> = analytic
        .parameters()
        .into_iter()
        .map(|p| (p.name.clone(), p.grad.iter().copied().collect()))
        .collect();

    let eps = 1e-2;
    for (param_index, (name, grad)) in grads.iter().enumerate() {
        for element in [0, grad.len() / 2, grad.len() - 1] {
            let mut plus = model.clone();
            let mut minus = model.clone();
            plus.parameters()[param_index].value.as_slice_mut().unwrap()[element] += eps;
            minus.parameters()[param_index].value.as_slice_mut().unwrap()[element] -= eps;
            let numeric = (loss_of(&plus, &x, &y) - loss_of(&minus, &x, &y)) / (2.0 * eps);
            assert!(
                (numeric - grad[element]).abs() < 5e-3,
                "{name}[{element}]: numeric {numeric} vs analytic {}",
                grad[element]
            );
        }
    }
}

#[test]
fn test_training_reduces_loss() {
    let mut model = tiny_qat(Backend::Fbgemm);
    let mut optimizer = SGD::new(0.05, 0.9);
    let x = batch(12, model.input_dim(), 3);
    let y = targets(12, 3);

    let initial = loss_of(&model, &x, &y);
    for _ in 0..30 {
        let (logits, tape) = model.forward_train(&x, &mut LocalGroup).unwrap();
        let (_, grad) = CrossEntropyLoss.forward(&logits, &y);
        optimizer.zero_grad(&mut model.parameters());
        model.backward(&tape, &grad, &mut LocalGroup).unwrap();
        optimizer.step(&mut model.parameters());
    }
    assert!(loss_of(&model, &x, &y) < initial);
}

#[test]
fn test_freeze_bn_stops_running_stat_updates() {
    let mut model = tiny_qat(Backend::Qnnpack);
    let x = batch(8, model.input_dim(), 0);

    model.forward_train(&x, &mut LocalGroup).unwrap();
    let tracked = model.features[0].bn.num_batches_tracked;
    assert_eq!(tracked, 1);

    model.freeze_bn_stats();
    let before = model.features[0].bn.running_mean.clone();
    model.forward_train(&x, &mut LocalGroup).unwrap();
    assert_eq!(model.features[0].bn.num_batches_tracked, tracked);
    assert_eq!(model.features[0].bn.running_mean, before);
}

#[test]
fn test_disabled_observers_freeze_scales() {
    let mut model = tiny_qat(Backend::Qnnpack);
    model.forward_train(&batch(8, model.input_dim(), 0), &mut LocalGroup).unwrap();
    model.disable_observer();
    let scale = model.quant.tensor_qparams();

    model.forward(&batch(8, model.input_dim(), 0).mapv(|v| v * 10.0));
    assert_eq!(model.quant.tensor_qparams(), scale);

    model.enable_observer();
    model.forward(&batch(8, model.input_dim(), 0).mapv(|v| v * 10.0));
    assert!(model.quant.tensor_qparams().scale > scale.scale);
}

#[test]
fn test_integer_model_agrees_with_fake_quantized_model() {
    for backend in [Backend::Qnnpack, Backend::Fbgemm] {
        let mut model = tiny_qat(backend);
        for offset in 0..5 {
            model
                .forward_train(&batch(16, model.input_dim(), offset * 16), &mut LocalGroup)
                .unwrap();
        }
        model.disable_observer();
        model.eval();

        let quantized = convert_qat(&model).unwrap();
        let x = batch(10, model.input_dim(), 7);
        let fake = model.forward(&x);
        let integer = quantized.forward(&x);

        let out_scale = model.classifier.activation_post_process.tensor_qparams().scale;
        for (f, i) in fake.iter().zip(integer.iter()) {
            assert!(
                (f - i).abs() <= 2.0 * out_scale + 1e-6,
                "{backend}: fake {f} vs integer {i} (scale {out_scale})"
            );
        }
    }
}

#[test]
fn test_state_dict_round_trip() {
    let mut model = tiny_qat(Backend::Fbgemm);
    model.forward_train(&batch(8, model.input_dim(), 0), &mut LocalGroup).unwrap();
    model.freeze_bn_stats();
    model.disable_observer();
    let state = model.state_dict();

    assert!(state.contains_key("quant.activation_post_process.scale"));
    assert!(state.contains_key("features.0.weight_fake_quant.activation_post_process.min_val"));
    assert!(state.contains_key("features.0.freeze_bn"));
    assert!(state.contains_key("classifier.activation_post_process.zero_point"));

    let mut restored = tiny_qat(Backend::Fbgemm);
    restored.load_state_dict(&state).unwrap();
    assert_eq!(restored.state_dict(), state);
    assert!(restored.features[0].freeze_bn);
    assert!(!restored.quant.observer_enabled);
}

#[test]
fn test_float_keys_load_into_float_classifier() {
    let model = tiny_qat(Backend::Qnnpack);
    let mut float = build_classifier("mlp_tiny", 3, 99).unwrap();
    float.load_state_dict(&model.state_dict()).unwrap();
    assert_eq!(float.features[0].linear, model.features[0].linear);
    assert_eq!(float.classifier, model.classifier.linear);
}

#[test]
fn test_buffers_exclude_parameters() {
    let model = tiny_qat(Backend::Qnnpack);
    let buffers = model.buffers();
    assert!(buffers.contains_key("features.0.bn.running_var"));
    assert!(!buffers.contains_key("features.0.linear.weight"));
    assert!(!buffers.contains_key("classifier.weight"));
}

#[test]
fn test_broadcast_is_noop_for_single_process() {
    let mut model = tiny_qat(Backend::Qnnpack);
    let before = model.clone();
    model.broadcast_state(&mut LocalGroup, true).unwrap();
    assert_eq!(model, before);
}

#[test]
fn test_convert_sync_batchnorm_matches_local_statistics_for_one_process() {
    let mut local = tiny_qat(Backend::Qnnpack);
    let mut synced = local.clone();
    synced.convert_sync_batchnorm();
    assert!(synced.features.iter().all(|b| b.sync_bn));

    let x = batch(8, local.input_dim(), 1);
    let (a, _) = local.forward_train(&x, &mut LocalGroup).unwrap();
    let (b, _) = synced.forward_train(&x, &mut LocalGroup).unwrap();
    assert_eq!(a, b);
}
