//! Faster R-CNN recipe: classifier backbone, RPN head and box head.

use ndarray::{Array1, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::anchors::AnchorGenerator;
use super::roi::MultiScaleRoIAlign;
use crate::models::{build_classifier, read_float_tensors, resolve_pretrained, FeatureBlock};
use crate::nn::{Linear, StateDict, TensorRecord};
use crate::{Error, Result};

/// Input resizing and normalization applied by the runtime
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            min_size: 800,
            max_size: 1333,
            image_mean: crate::data::IMAGENET_MEAN,
            image_std: crate::data::IMAGENET_STD,
        }
    }
}

/// Proposal filtering at inference time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpnConfig {
    pub pre_nms_top_n_test: usize,
    pub post_nms_top_n_test: usize,
    pub nms_thresh: f32,
    pub fg_iou_thresh: f32,
    pub bg_iou_thresh: f32,
}

impl Default for RpnConfig {
    fn default() -> Self {
        Self {
            pre_nms_top_n_test: 1000,
            post_nms_top_n_test: 1000,
            nms_thresh: 0.7,
            fg_iou_thresh: 0.7,
            bg_iou_thresh: 0.3,
        }
    }
}

/// Final detection filtering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxConfig {
    pub score_thresh: f32,
    pub nms_thresh: f32,
    pub detections_per_img: usize,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            score_thresh: 0.05,
            nms_thresh: 0.5,
            detections_per_img: 100,
        }
    }
}

/// Everything that determines the exported detection model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Zoo model whose feature blocks form the backbone
    pub backbone: String,
    /// Backbone output width
    pub out_channels: usize,
    /// Classes including background
    pub num_classes: usize,
    /// Width of the two box-head layers
    pub representation_size: usize,
    pub anchor_generator: AnchorGenerator,
    pub box_roi_pool: MultiScaleRoIAlign,
    pub transform: TransformConfig,
    pub rpn: RpnConfig,
    pub box_config: BoxConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            backbone: "mlp_base".to_string(),
            out_channels: 1280,
            num_classes: 2,
            representation_size: 1024,
            anchor_generator: AnchorGenerator::default(),
            box_roi_pool: MultiScaleRoIAlign::default(),
            transform: TransformConfig::default(),
            rpn: RpnConfig::default(),
            box_config: BoxConfig::default(),
        }
    }
}

/// Convolution weights `[out, in, k, k]` and bias `[out]`
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    pub weight: ArrayD<f32>,
    pub bias: Array1<f32>,
}

impl Conv2d {
    /// Weights from `N(0, 0.01)`, zero bias
    fn normal_init(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let normal = Normal::new(0.0f32, 0.01)
            .map_err(|e| Error::InvalidConfig(format!("conv init: {e}")))?;
        let weight = ArrayD::from_shape_simple_fn(
            IxDyn(&[out_channels, in_channels, kernel, kernel]),
            || normal.sample(&mut *rng),
        );
        Ok(Self {
            weight,
            bias: Array1::zeros(out_channels),
        })
    }

    fn save_state(&self, prefix: &str, state: &mut StateDict) {
        state.insert(format!("{prefix}.weight"), TensorRecord::from_arrayd(&self.weight));
        state.insert(format!("{prefix}.bias"), TensorRecord::from_array1(&self.bias));
    }
}

/// 3x3 conv shared by the objectness and box-delta 1x1 convs
#[derive(Clone, Debug, PartialEq)]
pub struct RpnHead {
    pub conv: Conv2d,
    pub cls_logits: Conv2d,
    pub bbox_pred: Conv2d,
}

impl RpnHead {
    pub fn new(in_channels: usize, num_anchors: usize, rng: &mut StdRng) -> Result<Self> {
        Ok(Self {
            conv: Conv2d::normal_init(in_channels, in_channels, 3, rng)?,
            cls_logits: Conv2d::normal_init(in_channels, num_anchors, 1, rng)?,
            bbox_pred: Conv2d::normal_init(in_channels, 4 * num_anchors, 1, rng)?,
        })
    }
}

/// Two fully connected layers over pooled RoI features
#[derive(Clone, Debug, PartialEq)]
pub struct TwoMlpHead {
    pub fc6: Linear,
    pub fc7: Linear,
}

/// Class scores and per-class box deltas
#[derive(Clone, Debug, PartialEq)]
pub struct FastRcnnPredictor {
    pub cls_score: Linear,
    pub bbox_pred: Linear,
}

/// Submodules that carry a training flag, in graph order
pub const MODULES: [&str; 4] = ["backbone", "rpn", "roi_heads.box_head", "roi_heads.box_predictor"];

/// Faster R-CNN assembled from [`DetectionConfig`]
#[derive(Clone, Debug, PartialEq)]
pub struct FasterRcnn {
    pub config: DetectionConfig,
    pub backbone: Vec<FeatureBlock>,
    pub rpn_head: RpnHead,
    pub box_head: TwoMlpHead,
    pub box_predictor: FastRcnnPredictor,
    training: [bool; 4],
}

/// Backbone blocks of `name`, with pretrained weights when a file is available
fn build_backbone(name: &str, seed: u64) -> Result<Vec<FeatureBlock>> {
    let Some(path) = resolve_pretrained(name, None) else {
        warn!("No pretrained weights for backbone {name}; using random initialisation");
        return Ok(build_classifier(name, 1, seed)?.into_features());
    };
    info!("Loading backbone weights from {}", path.display());
    let state = read_float_tensors(&std::fs::read(&path)?)?;
    let num_classes = state
        .get("classifier.bias")
        .map(|record| record.len())
        .ok_or_else(|| Error::MissingTensor("classifier.bias".to_string()))?;
    let mut model = build_classifier(name, num_classes, seed)?;
    model.load_state_dict(&state)?;
    Ok(model.into_features())
}

impl FasterRcnn {
    /// Build the recipe; starts in training mode like any freshly built module
    pub fn new(config: DetectionConfig, seed: u64) -> Result<Self> {
        let backbone = build_backbone(&config.backbone, seed)?;
        let width = backbone
            .last()
            .map(|block| block.linear.out_features())
            .unwrap_or_default();
        if width != config.out_channels {
            return Err(Error::InvalidConfig(format!(
                "backbone {} produces {width} channels, expected {}",
                config.backbone, config.out_channels
            )));
        }
        if config.num_classes < 2 {
            return Err(Error::InvalidConfig(
                "detection needs at least one class besides background".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
        let anchors = config.anchor_generator.num_anchors_per_location();
        let rpn_head = RpnHead::new(config.out_channels, anchors, &mut rng)?;
        let pooled = config.out_channels * config.box_roi_pool.resolution();
        let repr = config.representation_size;
        let box_head = TwoMlpHead {
            fc6: Linear::new(pooled, repr, &mut rng),
            fc7: Linear::new(repr, repr, &mut rng),
        };
        let box_predictor = FastRcnnPredictor {
            cls_score: Linear::new(repr, config.num_classes, &mut rng),
            bbox_pred: Linear::new(repr, 4 * config.num_classes, &mut rng),
        };

        Ok(Self {
            config,
            backbone,
            rpn_head,
            box_head,
            box_predictor,
            training: [true; 4],
        })
    }

    pub fn train(&mut self) {
        self.training = [true; 4];
    }

    pub fn eval(&mut self) {
        self.training = [false; 4];
    }

    /// Names of submodules still in training mode
    pub fn training_modules(&self) -> Vec<&'static str> {
        MODULES
            .iter()
            .zip(self.training)
            .filter_map(|(name, training)| training.then_some(*name))
            .collect()
    }

    /// Put one submodule back in training mode
    pub fn set_training(&mut self, module: &str, training: bool) -> Result<()> {
        let index = MODULES
            .iter()
            .position(|name| *name == module)
            .ok_or_else(|| Error::InvalidConfig(format!("no submodule named {module}")))?;
        self.training[index] = training;
        Ok(())
    }

    /// Every parameter plus the cell anchors, under their graph names
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.backbone.iter().enumerate() {
            block.linear.save_state(&format!("backbone.{i}.linear"), &mut state);
            block.bn.save_state(&format!("backbone.{i}.bn"), &mut state);
        }
        state.insert(
            "rpn.anchor_generator.cell_anchors".to_string(),
            TensorRecord::from_array2(&self.config.anchor_generator.cell_anchors()),
        );
        self.rpn_head.conv.save_state("rpn.head.conv", &mut state);
        self.rpn_head.cls_logits.save_state("rpn.head.cls_logits", &mut state);
        self.rpn_head.bbox_pred.save_state("rpn.head.bbox_pred", &mut state);
        self.box_head.fc6.save_state("roi_heads.box_head.fc6", &mut state);
        self.box_head.fc7.save_state("roi_heads.box_head.fc7", &mut state);
        self.box_predictor
            .cls_score
            .save_state("roi_heads.box_predictor.cls_score", &mut state);
        self.box_predictor
            .bbox_pred
            .save_state("roi_heads.box_predictor.bbox_pred", &mut state);
        state
    }
}
