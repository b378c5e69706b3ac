//! Serializable run settings

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Dataset location used when none is configured
pub const DEFAULT_DATA_PATH: &str = "/datasets01/imagenet_full_size/061417/";

/// Every setting of a `cuantizar train` run
///
/// Stored verbatim in each checkpoint under `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Root with `train/` and `val/` image folders
    pub data_path: PathBuf,
    /// Model zoo entry
    pub model: String,
    /// Quantization backend, `fbgemm` or `qnnpack`
    pub backend: String,
    pub device: String,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub epochs: usize,
    /// Observers are frozen from this epoch on
    pub num_observer_update_epochs: usize,
    /// Batch-norm statistics are frozen from this epoch on
    pub num_batch_norm_update_epochs: usize,
    /// PTQ calibration size, in batches per worker
    pub num_calibration_batches: usize,
    /// Decoder threads
    pub workers: usize,
    pub lr: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    pub lr_step_size: usize,
    pub lr_gamma: f32,
    pub print_freq: usize,
    /// Checkpoint directory; `None` disables every write
    pub output_dir: Option<PathBuf>,
    pub resume: Option<PathBuf>,
    pub start_epoch: usize,
    pub cache_dataset: bool,
    /// Cross-process batch-norm statistics
    pub sync_bn: bool,
    pub test_only: bool,
    pub post_training_quantize: bool,
    /// Pretrained weights; quantized JSON with `test_only`, float safetensors otherwise
    pub weights: Option<PathBuf>,
    pub seed: u64,
    pub world_size: usize,
    pub dist_url: String,
    /// Validate and print the settings without running
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            model: "mlp_small".to_string(),
            backend: "qnnpack".to_string(),
            device: "cpu".to_string(),
            batch_size: 32,
            eval_batch_size: 128,
            epochs: 90,
            num_observer_update_epochs: 4,
            num_batch_norm_update_epochs: 3,
            num_calibration_batches: 32,
            workers: 16,
            lr: 0.0001,
            momentum: 0.9,
            weight_decay: 1e-4,
            lr_step_size: 30,
            lr_gamma: 0.1,
            print_freq: 10,
            output_dir: Some(PathBuf::from(".")),
            resume: None,
            start_epoch: 0,
            cache_dataset: false,
            sync_bn: false,
            test_only: false,
            post_training_quantize: false,
            weights: None,
            seed: 0,
            world_size: 1,
            dist_url: "env://".to_string(),
            dry_run: false,
        }
    }
}

/// Read a `RunConfig` from YAML, or JSON when the extension is `.json`
///
/// Missing keys keep their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<RunConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(config)
}
