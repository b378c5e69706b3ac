//! Tests for the detection recipe and its artifact

use super::*;
use crate::Error;

fn tiny_config() -> DetectionConfig {
    DetectionConfig {
        backbone: "mlp_tiny".to_string(),
        out_channels: 32,
        representation_size: 16,
        box_roi_pool: MultiScaleRoIAlign {
            output_size: 2,
            ..MultiScaleRoIAlign::default()
        },
        ..DetectionConfig::default()
    }
}

#[test]
fn test_default_recipe_settings() {
    let config = DetectionConfig::default();
    assert_eq!(config.backbone, "mlp_base");
    assert_eq!(config.out_channels, 1280);
    assert_eq!(config.num_classes, 2);
    assert_eq!(config.representation_size, 1024);
    assert_eq!(config.box_roi_pool.featmap_names, vec!["0".to_string()]);
    assert_eq!(config.box_roi_pool.resolution(), 49);
    assert_eq!(config.box_roi_pool.sampling_ratio, 2);
    assert_eq!(config.transform.min_size, 800);
    assert_eq!(config.transform.max_size, 1333);
    assert_eq!(config.box_config.detections_per_img, 100);
}

#[test]
fn test_head_shapes() {
    let model = FasterRcnn::new(tiny_config(), 0).unwrap();
    assert_eq!(model.rpn_head.conv.weight.shape(), &[32, 32, 3, 3]);
    assert_eq!(model.rpn_head.cls_logits.weight.shape(), &[15, 32, 1, 1]);
    assert_eq!(model.rpn_head.bbox_pred.weight.shape(), &[60, 32, 1, 1]);
    assert_eq!(model.box_head.fc6.weight.dim(), (16, 32 * 4));
    assert_eq!(model.box_head.fc7.weight.dim(), (16, 16));
    assert_eq!(model.box_predictor.cls_score.weight.dim(), (2, 16));
    assert_eq!(model.box_predictor.bbox_pred.weight.dim(), (8, 16));
}

#[test]
fn test_rpn_init_is_small_normal_with_zero_bias() {
    let model = FasterRcnn::new(tiny_config(), 3).unwrap();
    let weight = &model.rpn_head.conv.weight;
    let n = weight.len() as f32;
    let mean = weight.sum() / n;
    let std = (weight.mapv(|w| (w - mean).powi(2)).sum() / n).sqrt();
    assert!(mean.abs() < 1e-3, "mean {mean}");
    assert!((0.009..0.011).contains(&std), "std {std}");
    assert!(model.rpn_head.conv.bias.iter().all(|&b| b == 0.0));
    assert!(model.rpn_head.bbox_pred.bias.iter().all(|&b| b == 0.0));
}

#[test]
fn test_same_seed_same_model() {
    let a = FasterRcnn::new(tiny_config(), 9).unwrap();
    let b = FasterRcnn::new(tiny_config(), 9).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_backbone_width_must_match() {
    let config = DetectionConfig {
        out_channels: 64,
        ..tiny_config()
    };
    assert!(matches!(
        FasterRcnn::new(config, 0),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_capture_requires_eval_mode() {
    let mut model = FasterRcnn::new(tiny_config(), 0).unwrap();
    assert_eq!(model.training_modules().len(), MODULES.len());
    assert!(matches!(capture(&model), Err(Error::NotInEvalMode(_))));

    model.eval();
    assert!(capture(&model).is_ok());

    model.set_training("rpn", true).unwrap();
    match capture(&model) {
        Err(Error::NotInEvalMode(module)) => assert_eq!(module, "rpn"),
        other => panic!("expected NotInEvalMode, got {other:?}"),
    }
    assert!(model.set_training("neck", true).is_err());
}

#[test]
fn test_graph_params_exist_in_state() {
    let mut model = FasterRcnn::new(tiny_config(), 0).unwrap();
    model.eval();
    let graph = capture(&model).unwrap();
    let state = model.state_dict();
    for node in &graph.nodes {
        for param in &node.params {
            assert!(state.contains_key(param), "missing {param}");
        }
    }
    assert_eq!(
        graph.nodes.last().map(|n| n.op.as_str()),
        Some("postprocess_detections")
    );
}

#[test]
fn test_export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("app/src/main/assets/frcnn.pt");
    let config = tiny_config();

    let summary = export_detection_model(&config, 5, &output).unwrap();
    assert_eq!(summary.path, output);
    assert!(output.exists());

    let artifact = load_artifact(&output).unwrap();
    assert_eq!(artifact.format_version, ARTIFACT_VERSION);
    assert_eq!(artifact.graph.config, config);
    assert_eq!(artifact.tensors.len(), summary.num_tensors);

    let mut model = FasterRcnn::new(config, 5).unwrap();
    model.eval();
    assert_eq!(artifact.tensors, model.state_dict());
    assert_eq!(
        artifact.tensors["rpn.anchor_generator.cell_anchors"].shape,
        vec![15, 4]
    );
}

#[test]
fn test_save_artifact_rejects_training_model() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("frcnn.pt");
    let model = FasterRcnn::new(tiny_config(), 0).unwrap();
    assert!(matches!(
        save_artifact(&model, &output),
        Err(Error::NotInEvalMode(_))
    ));
    assert!(!output.exists());
}

#[test]
fn test_load_rejects_plain_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.safetensors");
    let model = crate::models::build_classifier("mlp_tiny", 3, 0).unwrap();
    crate::models::save_weights(&model, &path).unwrap();
    assert!(load_artifact(&path).is_err());
}
