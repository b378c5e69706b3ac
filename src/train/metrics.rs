//! Running averages and progress lines

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::distributed::ProcessGroup;
use crate::Result;

/// Windowed and global average of a scalar series
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedValue {
    window: VecDeque<f32>,
    window_size: usize,
    total: f64,
    count: usize,
}

impl SmoothedValue {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            total: 0.0,
            count: 0,
        }
    }

    /// Record `value`, weighted by `n` in the global average
    pub fn update(&mut self, value: f32, n: usize) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(value);
        self.count += n;
        self.total += f64::from(value) * n as f64;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Median of the window
    pub fn median(&self) -> f32 {
        let mut sorted: Vec<f32> = self.window.iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_by(f32::total_cmp);
        sorted[(sorted.len() - 1) / 2]
    }

    /// Mean of the window
    pub fn avg(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    /// Weighted mean over every update
    pub fn global_avg(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.total / self.count as f64) as f32
    }

    /// Most recent value
    pub fn value(&self) -> f32 {
        self.window.back().copied().unwrap_or(0.0)
    }

    /// Sum `count` and `total` over all ranks; the window stays local
    pub fn synchronize(&mut self, group: &mut dyn ProcessGroup) -> Result<()> {
        let mut sums = [self.count as f32, self.total as f32];
        group.all_reduce_sum(&mut sums)?;
        self.count = sums[0].round() as usize;
        self.total = f64::from(sums[1]);
        Ok(())
    }
}

impl fmt::Display for SmoothedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} ({:.4})", self.median(), self.global_avg())
    }
}

/// Named meters printed as one progress line
#[derive(Clone, Debug, Default)]
pub struct MetricLogger {
    meters: BTreeMap<String, SmoothedValue>,
    /// Shown without smoothing, e.g. the learning rate
    values: BTreeMap<String, f32>,
}

impl MetricLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample to meter `name`, creating it with a window of 20
    pub fn update(&mut self, name: &str, value: f32, n: usize) {
        self.meters
            .entry(name.to_string())
            .or_insert_with(|| SmoothedValue::new(20))
            .update(value, n);
    }

    /// Set an unsmoothed value
    pub fn set(&mut self, name: &str, value: f32) {
        self.values.insert(name.to_string(), value);
    }

    pub fn meter(&self, name: &str) -> Option<&SmoothedValue> {
        self.meters.get(name)
    }

    /// Global average of meter `name`, zero when absent
    pub fn global_avg(&self, name: &str) -> f32 {
        self.meter(name).map_or(0.0, SmoothedValue::global_avg)
    }

    pub fn synchronize(&mut self, group: &mut dyn ProcessGroup) -> Result<()> {
        for meter in self.meters.values_mut() {
            meter.synchronize(group)?;
        }
        Ok(())
    }

    /// `<header> [i/total]  name: value  ...`
    pub fn progress_line(&self, header: &str, step: usize, total: usize) -> String {
        let width = total.to_string().len();
        format!("{header} [{step:>width$}/{total}]  {self}")
    }
}

impl fmt::Display for MetricLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .values
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();
        parts.extend(
            self.meters
                .iter()
                .map(|(name, meter)| format!("{name}: {meter}")),
        );
        write!(f, "{}", parts.join("  "))
    }
}

/// `H:MM:SS`, hours unbounded
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::LocalGroup;
    use approx::assert_relative_eq;
    use std::time::Duration;

    #[test]
    fn test_window_and_global_average() {
        let mut meter = SmoothedValue::new(2);
        meter.update(1.0, 1);
        meter.update(2.0, 1);
        meter.update(6.0, 2);
        assert_relative_eq!(meter.avg(), 4.0);
        assert_relative_eq!(meter.median(), 2.0);
        assert_relative_eq!(meter.global_avg(), 15.0 / 4.0);
        assert_relative_eq!(meter.value(), 6.0);
        assert_eq!(meter.count(), 4);
    }

    #[test]
    fn test_empty_meter_reads_zero() {
        let meter = SmoothedValue::new(20);
        assert_eq!(meter.median(), 0.0);
        assert_eq!(meter.global_avg(), 0.0);
        assert_eq!(MetricLogger::new().global_avg("loss"), 0.0);
    }

    #[test]
    fn test_synchronize_single_process_keeps_totals() {
        let mut logger = MetricLogger::new();
        logger.update("acc1", 50.0, 4);
        logger.update("acc1", 100.0, 4);
        logger.synchronize(&mut LocalGroup).unwrap();
        assert_relative_eq!(logger.global_avg("acc1"), 75.0);
    }

    #[test]
    fn test_progress_line_layout() {
        let mut logger = MetricLogger::new();
        logger.set("lr", 0.1);
        logger.update("loss", 2.5, 1);
        let line = logger.progress_line("Epoch: [3]", 7, 120);
        assert_eq!(line, "Epoch: [3] [  7/120]  lr: 0.1  loss: 2.5000 (2.5000)");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "0:00:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "25:00:00");
    }
}
