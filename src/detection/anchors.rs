//! Anchor boxes for the region proposal network.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Anchor sizes and aspect ratios for one feature map
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorGenerator {
    /// Anchor side lengths in input pixels
    pub sizes: Vec<f32>,
    /// Height / width ratios
    pub aspect_ratios: Vec<f32>,
}

impl Default for AnchorGenerator {
    fn default() -> Self {
        Self {
            sizes: vec![32.0, 64.0, 128.0, 256.0, 512.0],
            aspect_ratios: vec![0.5, 1.0, 2.0],
        }
    }
}

impl AnchorGenerator {
    pub fn num_anchors_per_location(&self) -> usize {
        self.sizes.len() * self.aspect_ratios.len()
    }

    /// Zero-centred `[x1, y1, x2, y2]` boxes, one row per (ratio, size) pair
    ///
    /// Rows are ordered ratio-major. Coordinates are rounded half to even.
    pub fn cell_anchors(&self) -> Array2<f32> {
        let mut anchors = Array2::zeros((self.num_anchors_per_location(), 4));
        let pairs = self
            .aspect_ratios
            .iter()
            .flat_map(|&ratio| self.sizes.iter().map(move |&size| (ratio, size)));
        for (mut row, (ratio, size)) in anchors.rows_mut().into_iter().zip(pairs) {
            let h_ratio = ratio.sqrt();
            let w_ratio = 1.0 / h_ratio;
            let ws = w_ratio * size;
            let hs = h_ratio * size;
            for (slot, value) in row.iter_mut().zip([-ws, -hs, ws, hs]) {
                *slot = (value / 2.0).round_ties_even();
            }
        }
        anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_fifteen_anchors() {
        let generator = AnchorGenerator::default();
        assert_eq!(generator.num_anchors_per_location(), 15);
        assert_eq!(generator.cell_anchors().dim(), (15, 4));
    }

    #[test]
    fn test_square_anchors_are_exact() {
        let anchors = AnchorGenerator::default().cell_anchors();
        // ratio 1.0 is the second ratio block
        assert_eq!(anchors.row(5).to_vec(), vec![-16.0, -16.0, 16.0, 16.0]);
        assert_eq!(anchors.row(9).to_vec(), vec![-256.0, -256.0, 256.0, 256.0]);
    }

    #[test]
    fn test_wide_and_tall_anchors_mirror_each_other() {
        let anchors = AnchorGenerator::default().cell_anchors();
        assert_eq!(anchors.row(0).to_vec(), vec![-23.0, -11.0, 23.0, 11.0]);
        for i in 0..5 {
            let wide = anchors.row(i);
            let tall = anchors.row(10 + i);
            assert_eq!(wide[0], tall[1]);
            assert_eq!(wide[2], tall[3]);
        }
    }

    #[test]
    fn test_anchors_are_centred_on_origin() {
        let anchors = AnchorGenerator::default().cell_anchors();
        for row in anchors.rows() {
            assert_eq!(row[0], -row[2]);
            assert_eq!(row[1], -row[3]);
            assert!(row[2] > 0.0 && row[3] > 0.0);
        }
    }
}
