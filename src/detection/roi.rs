//! Region-of-interest pooling settings.

use serde::{Deserialize, Serialize};

/// Multi-scale RoI align over named feature maps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiScaleRoIAlign {
    pub featmap_names: Vec<String>,
    /// Side of the pooled grid
    pub output_size: usize,
    /// Sampling points per bin side; 0 means adaptive
    pub sampling_ratio: usize,
}

impl Default for MultiScaleRoIAlign {
    fn default() -> Self {
        Self {
            featmap_names: vec!["0".to_string()],
            output_size: 7,
            sampling_ratio: 2,
        }
    }
}

impl MultiScaleRoIAlign {
    /// Pooled values per channel
    pub fn resolution(&self) -> usize {
        self.output_size * self.output_size
    }
}
