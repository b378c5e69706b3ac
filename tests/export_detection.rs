//! Export of a scaled-down detection recipe through the public API

use cuantizar::detection::{
    export_detection_model, load_artifact, AnchorGenerator, DetectionConfig, MultiScaleRoIAlign,
};

#[test]
fn test_export_creates_parents_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("app/src/main/assets/frcnn.pt");
    let config = DetectionConfig {
        backbone: "mlp_tiny".to_string(),
        out_channels: 32,
        representation_size: 8,
        box_roi_pool: MultiScaleRoIAlign {
            output_size: 1,
            ..MultiScaleRoIAlign::default()
        },
        ..DetectionConfig::default()
    };

    let summary = export_detection_model(&config, 0, &output).unwrap();
    let artifact = load_artifact(&output).unwrap();
    assert_eq!(artifact.graph.config, config);
    assert_eq!(artifact.tensors.len(), summary.num_tensors);

    let anchors = &artifact.tensors["rpn.anchor_generator.cell_anchors"];
    assert_eq!(anchors.shape, vec![15, 4]);
    let expected = AnchorGenerator::default().cell_anchors();
    assert_eq!(anchors.data, expected.iter().copied().collect::<Vec<_>>());
}
