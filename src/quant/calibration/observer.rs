//! Observer implementation
//!
//! The main `Observer` struct for collecting statistics and computing
//! quantization parameters.

use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::types::{CalibrationMethod, Granularity};
use crate::nn::{require, StateDict, TensorRecord};
use crate::quant::qparams::{QParams, QuantRange};
use crate::Result;

const MAX_PERCENTILE_SAMPLES: usize = 100_000;

/// Running statistics of one channel (or of the whole tensor)
#[derive(Clone, Debug, Default, PartialEq)]
struct ChannelStats {
    running_min: Option<f32>,
    running_max: Option<f32>,
    samples: Vec<f32>,
    seen: usize,
}

/// Statistics collector that produces quantization parameters
#[derive(Clone, Debug, PartialEq)]
pub struct Observer {
    /// Calibration method
    method: CalibrationMethod,
    /// Per-tensor or per-channel
    granularity: Granularity,
    /// Target integer range
    range: QuantRange,
    /// Reservoir size for percentile calibration
    max_samples: usize,
    /// One entry per tensor or per channel
    channels: Vec<ChannelStats>,
    /// Number of batches observed
    num_batches: usize,
}

impl Observer {
    /// Create a per-tensor observer
    pub fn new(method: CalibrationMethod, range: QuantRange) -> Self {
        Self {
            method,
            granularity: Granularity::PerTensor,
            range,
            max_samples: MAX_PERCENTILE_SAMPLES,
            channels: Vec::new(),
            num_batches: 0,
        }
    }

    /// Switch to one range per output channel
    pub fn per_channel(mut self) -> Self {
        self.granularity = Granularity::PerChannel;
        self
    }

    /// Observe a matrix; per-channel observers treat each row as a channel
    pub fn observe(&mut self, data: ArrayView2<'_, f32>) {
        if data.is_empty() {
            return;
        }
        match self.granularity {
            Granularity::PerTensor => {
                self.ensure_channels(1);
                let values: Vec<f32> = data.iter().copied().collect();
                let method = self.method.clone();
                let max_samples = self.max_samples;
                observe_channel(&mut self.channels[0], &values, &method, max_samples);
            }
            Granularity::PerChannel => {
                self.ensure_channels(data.nrows());
                let method = self.method.clone();
                let max_samples = self.max_samples;
                for (stats, row) in self.channels.iter_mut().zip(data.axis_iter(Axis(0))) {
                    let values: Vec<f32> = row.iter().copied().collect();
                    observe_channel(stats, &values, &method, max_samples);
                }
            }
        }
        self.num_batches += 1;
    }

    /// Observed `(min, max)` per channel
    pub fn bounds(&self) -> Vec<(f32, f32)> {
        self.channels
            .iter()
            .map(|stats| match &self.method {
                CalibrationMethod::MinMax | CalibrationMethod::MovingAverage { .. } => (
                    stats.running_min.unwrap_or(0.0),
                    stats.running_max.unwrap_or(0.0),
                ),
                CalibrationMethod::Percentile { lower, upper } => {
                    percentile_bounds(stats, *lower, *upper)
                }
            })
            .collect()
    }

    /// Quantization parameters per channel (a single entry when per-tensor)
    pub fn qparams(&self) -> Vec<QParams> {
        self.bounds()
            .into_iter()
            .map(|(lo, hi)| self.range.qparams(lo, hi))
            .collect()
    }

    /// Target integer range
    pub fn range(&self) -> QuantRange {
        self.range
    }

    /// Per-tensor or per-channel
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Get calibration method
    pub fn method(&self) -> &CalibrationMethod {
        &self.method
    }

    /// Get number of batches observed
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Check if any data has been observed
    pub fn has_data(&self) -> bool {
        self.num_batches > 0
    }

    /// Append `min_val`/`max_val` under `prefix`
    ///
    /// An observer without data is stored as empty tensors.
    pub fn save_state(&self, prefix: &str, state: &mut StateDict) {
        let (mins, maxs): (Vec<f32>, Vec<f32>) = if self.has_data() {
            self.bounds().into_iter().unzip()
        } else {
            (Vec::new(), Vec::new())
        };
        state.insert(
            format!("{prefix}.min_val"),
            TensorRecord {
                shape: vec![mins.len()],
                data: mins,
            },
        );
        state.insert(
            format!("{prefix}.max_val"),
            TensorRecord {
                shape: vec![maxs.len()],
                data: maxs,
            },
        );
    }

    /// Restore `min_val`/`max_val` from `prefix`
    pub fn load_state(&mut self, prefix: &str, state: &StateDict) -> Result<()> {
        let mins = &require(state, &format!("{prefix}.min_val"))?.data;
        let maxs = &require(state, &format!("{prefix}.max_val"))?.data;
        self.channels = mins
            .iter()
            .zip(maxs)
            .map(|(&lo, &hi)| ChannelStats {
                running_min: Some(lo),
                running_max: Some(hi),
                samples: Vec::new(),
                seen: 0,
            })
            .collect();
        self.num_batches = usize::from(!self.channels.is_empty());
        Ok(())
    }

    fn ensure_channels(&mut self, n: usize) {
        if self.channels.len() != n {
            self.channels = vec![ChannelStats::default(); n];
        }
    }
}

fn observe_channel(
    stats: &mut ChannelStats,
    data: &[f32],
    method: &CalibrationMethod,
    max_samples: usize,
) {
    match method {
        CalibrationMethod::MinMax => observe_min_max(stats, data),
        CalibrationMethod::Percentile { .. } => {
            observe_percentile(stats, data, max_samples);
        }
        CalibrationMethod::MovingAverage { averaging_constant } => {
            observe_moving_average(stats, data, *averaging_constant);
        }
    }
}

fn batch_min_max(data: &[f32]) -> (f32, f32) {
    let batch_min = data.iter().copied().fold(f32::INFINITY, f32::min);
    let batch_max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (batch_min, batch_max)
}

fn observe_min_max(stats: &mut ChannelStats, data: &[f32]) {
    let (batch_min, batch_max) = batch_min_max(data);
    stats.running_min = Some(stats.running_min.map_or(batch_min, |m| m.min(batch_min)));
    stats.running_max = Some(stats.running_max.map_or(batch_max, |m| m.max(batch_max)));
}

fn observe_percentile(stats: &mut ChannelStats, data: &[f32], max_samples: usize) {
    // Reservoir sampling once the cap is reached; seeded so calibration is reproducible
    let mut rng = StdRng::seed_from_u64(stats.seen as u64);
    for &val in data {
        if stats.samples.len() < max_samples {
            stats.samples.push(val);
        } else {
            let j = rng.random_range(0..=stats.seen);
            if j < max_samples {
                stats.samples[j] = val;
            }
        }
        stats.seen += 1;
    }

    // Also track min/max for fallback
    observe_min_max(stats, data);
}

fn observe_moving_average(stats: &mut ChannelStats, data: &[f32], c: f32) {
    let (batch_min, batch_max) = batch_min_max(data);
    stats.running_min = Some(stats.running_min.map_or(batch_min, |m| m + c * (batch_min - m)));
    stats.running_max = Some(stats.running_max.map_or(batch_max, |m| m + c * (batch_max - m)));
}

fn percentile_bounds(stats: &ChannelStats, lower: f32, upper: f32) -> (f32, f32) {
    if stats.samples.is_empty() {
        return (
            stats.running_min.unwrap_or(0.0),
            stats.running_max.unwrap_or(0.0),
        );
    }

    let mut sorted = stats.samples.clone();
    sorted.sort_by(f32::total_cmp);

    let n = sorted.len();
    let lower_idx = (((lower / 100.0) * n as f32) as usize).min(n - 1);
    let upper_idx = ((upper / 100.0) * n as f32).min((n - 1) as f32) as usize;

    (sorted[lower_idx], sorted[upper_idx])
}
