//! Run configuration
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. [`RunConfig::default`]
//! 2. an optional YAML or JSON file passed with `--config`
//! 3. command-line flags, applied by [`apply_overrides`]
//!
//! ```bash
//! cuantizar train --data-path ./imagenette --model mlp_small --backend fbgemm
//! cuantizar train --config run.yaml --epochs 10 --output-dir ./checkpoints
//! cuantizar train --post-training-quantize --num-calibration-batches 8
//! cuantizar export --output app/src/main/assets/frcnn.pt
//! ```

mod cli;
mod schema;
mod validate;

#[cfg(test)]
mod tests;

pub use cli::{apply_overrides, parse_args, Cli, Command, ExportArgs, TrainArgs};
pub use schema::{load_config, RunConfig, DEFAULT_DATA_PATH};

use std::path::PathBuf;

/// Root of cached datasets and pretrained weights
///
/// `$CUANTIZAR_HOME` when set, otherwise `cuantizar` under the user cache directory.
pub fn cuantizar_home() -> PathBuf {
    home_from(std::env::var_os("CUANTIZAR_HOME").map(PathBuf::from))
}

fn home_from(explicit: Option<PathBuf>) -> PathBuf {
    explicit.filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("cuantizar")
    })
}
