//! Graph capture and the mobile artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::model::{DetectionConfig, FasterRcnn};
use crate::models::{read_float_tensors, serialize_records};
use crate::nn::{StateDict, TensorRecord};
use crate::{Error, Result};

/// `format` metadata value of every artifact
pub const ARTIFACT_FORMAT: &str = "cuantizar-frcnn";
/// `format_version` metadata value written by this crate
pub const ARTIFACT_VERSION: u32 = 1;

/// One operation of the captured graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub op: String,
    /// Names of the node inputs
    pub inputs: Vec<String>,
    /// Tensor names this node reads
    pub params: Vec<String>,
    #[serde(default)]
    pub attrs: serde_json::Value,
}

/// Module graph plus every hyperparameter the runtime needs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub config: DetectionConfig,
    pub nodes: Vec<GraphNode>,
}

fn node(
    name: &str,
    op: &str,
    inputs: &[&str],
    params: &[&str],
    attrs: serde_json::Value,
) -> GraphNode {
    GraphNode {
        params: params.iter().map(|p| format!("{name}.{p}")).collect(),
        inputs: inputs.iter().map(|i| i.to_string()).collect(),
        op: op.to_string(),
        name: name.to_string(),
        attrs,
    }
}

/// Describe `model` as a graph; every submodule must be in eval mode
pub fn capture(model: &FasterRcnn) -> Result<Graph> {
    if let Some(module) = model.training_modules().first() {
        return Err(Error::NotInEvalMode(module.to_string()));
    }
    let config = &model.config;
    let mut nodes = vec![node(
        "transform",
        "generalized_rcnn_transform",
        &["images"],
        &[],
        json!({}),
    )];

    let mut previous = "transform".to_string();
    for i in 0..model.backbone.len() {
        let linear = format!("backbone.{i}.linear");
        let bn = format!("backbone.{i}.bn");
        let relu = format!("backbone.{i}.relu");
        nodes.push(node(&linear, "linear", &[previous.as_str()], &["weight", "bias"], json!({})));
        nodes.push(node(
            &bn,
            "batch_norm",
            &[linear.as_str()],
            &["weight", "bias", "running_mean", "running_var"],
            json!({ "eps": 1e-5 }),
        ));
        nodes.push(node(&relu, "relu", &[bn.as_str()], &[], json!({})));
        previous = relu;
    }
    let features = previous.as_str();

    let anchors = config.anchor_generator.num_anchors_per_location();
    let weight_bias = &["weight", "bias"];
    nodes.extend([
        node(
            "rpn.anchor_generator",
            "anchor_generator",
            &["transform", features],
            &["cell_anchors"],
            json!({}),
        ),
        node(
            "rpn.head.conv",
            "conv2d",
            &[features],
            weight_bias,
            json!({ "kernel_size": 3, "padding": 1, "activation": "relu" }),
        ),
        node(
            "rpn.head.cls_logits",
            "conv2d",
            &["rpn.head.conv"],
            weight_bias,
            json!({ "kernel_size": 1, "num_anchors": anchors }),
        ),
        node(
            "rpn.head.bbox_pred",
            "conv2d",
            &["rpn.head.conv"],
            weight_bias,
            json!({ "kernel_size": 1, "num_anchors": anchors }),
        ),
        node(
            "rpn.proposals",
            "region_proposals",
            &["rpn.anchor_generator", "rpn.head.cls_logits", "rpn.head.bbox_pred"],
            &[],
            json!({}),
        ),
        node(
            "roi_heads.box_roi_pool",
            "multi_scale_roi_align",
            &[features, "rpn.proposals"],
            &[],
            json!({}),
        ),
        node(
            "roi_heads.box_head.fc6",
            "linear",
            &["roi_heads.box_roi_pool"],
            weight_bias,
            json!({ "activation": "relu" }),
        ),
        node(
            "roi_heads.box_head.fc7",
            "linear",
            &["roi_heads.box_head.fc6"],
            weight_bias,
            json!({ "activation": "relu" }),
        ),
        node(
            "roi_heads.box_predictor.cls_score",
            "linear",
            &["roi_heads.box_head.fc7"],
            weight_bias,
            json!({}),
        ),
        node(
            "roi_heads.box_predictor.bbox_pred",
            "linear",
            &["roi_heads.box_head.fc7"],
            weight_bias,
            json!({}),
        ),
        node(
            "roi_heads.postprocess",
            "postprocess_detections",
            &[
                "roi_heads.box_predictor.cls_score",
                "roi_heads.box_predictor.bbox_pred",
                "rpn.proposals",
            ],
            &[],
            json!({}),
        ),
    ]);

    Ok(Graph {
        config: config.clone(),
        nodes,
    })
}

/// What [`export_detection_model`] wrote
#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub num_tensors: usize,
    pub num_parameters: usize,
}

/// Build the recipe, switch to eval mode, capture it and write the artifact
pub fn export_detection_model(
    config: &DetectionConfig,
    seed: u64,
    output: impl AsRef<Path>,
) -> Result<ExportSummary> {
    let mut model = FasterRcnn::new(config.clone(), seed)?;
    model.eval();
    save_artifact(&model, output)
}

/// Capture `model` and write it as a SafeTensors artifact
pub fn save_artifact(model: &FasterRcnn, output: impl AsRef<Path>) -> Result<ExportSummary> {
    let output = output.as_ref();
    let graph = capture(model)?;
    let state = model.state_dict();

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), ARTIFACT_FORMAT.to_string());
    metadata.insert("format_version".to_string(), ARTIFACT_VERSION.to_string());
    metadata.insert("graph".to_string(), serde_json::to_string(&graph)?);

    let records: Vec<(String, &TensorRecord)> =
        state.iter().map(|(k, v)| (k.clone(), v)).collect();
    let bytes = serialize_records(&records, metadata)?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, bytes)?;
    info!("Exported detection model to {}", output.display());

    Ok(ExportSummary {
        path: output.to_path_buf(),
        num_tensors: state.len(),
        num_parameters: state.values().map(TensorRecord::len).sum(),
    })
}

/// Contents of an artifact written by [`save_artifact`]
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionArtifact {
    pub format_version: u32,
    pub graph: Graph,
    pub tensors: StateDict,
}

/// Read an artifact back
pub fn load_artifact(path: impl AsRef<Path>) -> Result<DetectionArtifact> {
    let bytes = std::fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&bytes)?;
    let metadata = header.metadata().clone().unwrap_or_default();
    let field = |key: &str| {
        metadata
            .get(key)
            .ok_or_else(|| Error::MissingTensor(format!("__metadata__.{key}")))
    };

    if field("format")? != ARTIFACT_FORMAT {
        return Err(Error::InvalidConfig(format!(
            "not a detection artifact: format '{}'",
            field("format")?
        )));
    }
    let format_version = field("format_version")?
        .parse()
        .map_err(|_| Error::InvalidConfig("format_version is not an integer".to_string()))?;
    let graph = serde_json::from_str(field("graph")?)?;

    Ok(DetectionArtifact {
        format_version,
        graph,
        tensors: read_float_tensors(&bytes)?,
    })
}
