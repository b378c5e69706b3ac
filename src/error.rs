//! Error types for cuantizar

use std::path::PathBuf;

/// Errors raised by training, quantization and export
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Failed to decode image {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("Unknown model '{name}' (available: {available})")]
    UnknownModel { name: String, available: String },

    #[error("Unknown quantization backend '{0}' (expected fbgemm or qnnpack)")]
    UnknownBackend(String),

    #[error("Unsupported device '{0}': only cpu is available")]
    UnsupportedDevice(String),

    #[error("Shape mismatch for {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing tensor '{0}'")]
    MissingTensor(String),

    #[error("Dataset at {0} contains no images")]
    EmptyDataset(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Distributed error: {0}")]
    Distributed(String),

    #[error("Module '{0}' is in training mode; call eval() before capture")]
    NotInEvalMode(String),
}

/// Result type alias for cuantizar operations
pub type Result<T> = std::result::Result<T, Error>;
