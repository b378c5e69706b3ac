//! Observers: statistics collection for quantization parameters
//!
//! Observers watch tensors during calibration (PTQ) or training (QAT) and
//! turn the observed ranges into scale/zero-point pairs:
//! - Min-max: exact running min and max
//! - Moving average: exponentially smoothed min and max
//! - Percentile: clipped range, robust to outliers

mod observer;
mod types;


pub use observer::Observer;
pub use types::{CalibrationMethod, Granularity};
