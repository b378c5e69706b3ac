//! Quantization: QAT and PTQ
//!
//! - Affine qparams, integer ranges and fixed-point requantization
//! - Observers (min-max, moving average, percentile) per tensor or per channel
//! - Fake quantization with STE for QAT
//! - Backend qconfigs, fusion, `prepare` / `prepare_qat` and `convert`
//! - Integer-only inference with [`QuantizedClassifier`]

mod calibration;
mod convert;
mod fake_quantize;
mod fuse;
mod observed;
pub mod qat;
mod qconfig;
mod qparams;
mod quantized;

pub use calibration::{CalibrationMethod, Granularity, Observer};
pub use convert::{convert, convert_qat};
pub use fake_quantize::FakeQuantize;
pub use fuse::{fuse_model, FusedClassifier, FusedLinear};
pub use observed::{prepare, ObservedClassifier, ObservedLinear};
pub use qat::{prepare_qat, QatClassifier};
pub use qconfig::{Backend, ObserverSpec, QConfig, MOVING_AVERAGE_CONSTANT, PERCENTILE_BOUNDS};
pub use qparams::{FixedPointMultiplier, QParams, QuantRange};
pub use quantized::{QuantizedClassifier, QuantizedLinear};
