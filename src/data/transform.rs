//! Decoding and preprocessing of individual images.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Error, Result};

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessing pipeline for one split
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    /// Resize to `image_size`², random horizontal flip
    Train { image_size: u32, seed: u64 },
    /// Resize the short side to `image_size * 8 / 7`, centre crop `image_size`²
    Eval { image_size: u32 },
}

impl Transform {
    pub fn image_size(&self) -> u32 {
        match self {
            Self::Train { image_size, .. } | Self::Eval { image_size } => *image_size,
        }
    }

    /// Flattened CHW length of one transformed image
    pub fn output_len(&self) -> usize {
        let side = self.image_size() as usize;
        3 * side * side
    }

    /// Decode `path` and apply the pipeline
    pub fn load(&self, path: &Path, index: usize, epoch: usize) -> Result<Vec<f32>> {
        let image = image::open(path)
            .map_err(|e| Error::Image {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .to_rgb8();
        Ok(self.apply(&image, index, epoch))
    }

    /// Apply the pipeline to a decoded image
    ///
    /// Random choices depend only on the seed, the sample index and the
    /// epoch, so results do not depend on decode order.
    pub fn apply(&self, image: &RgbImage, index: usize, epoch: usize) -> Vec<f32> {
        match *self {
            Self::Train { image_size, seed } => {
                let resized = imageops::resize(image, image_size, image_size, FilterType::Triangle);
                let mut rng = StdRng::seed_from_u64(
                    seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
                        ^ (index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F),
                );
                let resized = if rng.random_bool(0.5) {
                    imageops::flip_horizontal(&resized)
                } else {
                    resized
                };
                normalize_chw(&resized)
            }
            Self::Eval { image_size } => {
                let short = (image_size as f32 * 8.0 / 7.0).round().max(image_size as f32) as u32;
                let (w, h) = image.dimensions();
                let (new_w, new_h) = if w <= h {
                    (short, ((h as f32 * short as f32 / w.max(1) as f32).round() as u32).max(short))
                } else {
                    (((w as f32 * short as f32 / h.max(1) as f32).round() as u32).max(short), short)
                };
                let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
                let x = (new_w - image_size) / 2;
                let y = (new_h - image_size) / 2;
                let cropped = imageops::crop_imm(&resized, x, y, image_size, image_size).to_image();
                normalize_chw(&cropped)
            }
        }
    }
}

/// Scale to `[0, 1]`, normalize per channel and lay out as CHW
pub fn normalize_chw(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut out = vec![0.0; 3 * plane];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] =
                (f32::from(pixel[c]) / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 128]))
    }

    #[test]
    fn test_normalize_layout() {
        let image = RgbImage::from_pixel(2, 1, Rgb([255, 0, 128]));
        let out = normalize_chw(&image);
        assert_eq!(out.len(), 6);
        assert_abs_diff_eq!(out[0], (1.0 - 0.485) / 0.229, epsilon = 1e-5);
        assert_abs_diff_eq!(out[2], (0.0 - 0.456) / 0.224, epsilon = 1e-5);
    }

    #[test]
    fn test_output_sizes() {
        let image = gradient(20, 12);
        let train = Transform::Train {
            image_size: 8,
            seed: 0,
        };
        let eval = Transform::Eval { image_size: 8 };
        assert_eq!(train.apply(&image, 0, 0).len(), train.output_len());
        assert_eq!(eval.apply(&image, 0, 0).len(), 3 * 64);
        assert_eq!(eval.apply(&gradient(5, 30), 0, 0).len(), 3 * 64);
    }

    #[test]
    fn test_train_flip_is_deterministic() {
        let image = gradient(8, 8);
        let transform = Transform::Train {
            image_size: 8,
            seed: 42,
        };
        assert_eq!(transform.apply(&image, 3, 1), transform.apply(&image, 3, 1));

        // Across many samples some are flipped and some are not
        let outputs: Vec<Vec<f32>> = (0..64).map(|i| transform.apply(&image, i, 0)).collect();
        assert!(outputs.iter().any(|o| o != &outputs[0]));
    }

    #[test]
    fn test_load_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let result = Transform::Eval { image_size: 8 }.load(&path, 0, 0);
        assert!(matches!(result, Err(Error::Image { .. })));
    }
}
