//! Type definitions for observers

use serde::{Deserialize, Serialize};

/// How an observer turns data into a range
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Min-max calibration: scale from actual min/max values
    #[default]
    MinMax,
    /// Percentile calibration: scale from percentile values (more robust to outliers)
    Percentile {
        /// Lower percentile (e.g., 0.001 for 0.001%)
        lower: f32,
        /// Upper percentile (e.g., 99.999 for 99.999%)
        upper: f32,
    },
    /// Moving average: smoothed min/max over multiple batches
    MovingAverage {
        /// Weight of the newest batch (torch's `averaging_constant`)
        averaging_constant: f32,
    },
}

/// Whether one range covers the whole tensor or each output channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    PerTensor,
    /// One range per row of a `[out, in]` weight matrix
    PerChannel,
}
