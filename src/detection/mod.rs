//! Detection model export
//!
//! Builds the Faster R-CNN recipe (zoo backbone, 15-anchor RPN, 7x7 RoI
//! align, two-layer box head, 2 classes), puts it in eval mode and writes a
//! SafeTensors artifact whose `__metadata__` carries the captured graph.

mod anchors;
mod export;
mod model;
mod roi;

#[cfg(test)]
mod tests;

pub use anchors::AnchorGenerator;
pub use export::{
    capture, export_detection_model, load_artifact, save_artifact, DetectionArtifact,
    ExportSummary, Graph, GraphNode, ARTIFACT_FORMAT, ARTIFACT_VERSION,
};
pub use model::{
    BoxConfig, Conv2d, DetectionConfig, FasterRcnn, FastRcnnPredictor, RpnConfig, RpnHead,
    TransformConfig, TwoMlpHead, MODULES,
};
pub use roi::MultiScaleRoIAlign;

/// Default artifact location, inside the Android test app's assets
pub const DEFAULT_OUTPUT: &str = "app/src/main/assets/frcnn.pt";
