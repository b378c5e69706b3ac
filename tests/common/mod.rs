//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cuantizar::config::RunConfig;
use cuantizar::models::{build_classifier, save_weights};
use image::{Rgb, RgbImage};

pub const CLASSES: [(&str, [u8; 3]); 3] = [
    ("blue", [20, 40, 220]),
    ("green", [30, 200, 40]),
    ("red", [210, 30, 30]),
];

/// Write `per_class` 12x10 images per colour under `root/<class>/`
pub fn write_split(root: &Path, per_class: usize) {
    for (name, base) in CLASSES {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let image = RgbImage::from_fn(12, 10, |x, y| {
                let jitter = ((x * 7 + y * 3 + i as u32 * 11) % 25) as u8;
                Rgb(base.map(|c| c.saturating_add(jitter)))
            });
            image.save(dir.join(format!("{i:03}.png"))).unwrap();
        }
    }
}

/// `root/train` with 6 images per class and `root/val` with 3
pub fn write_dataset(root: &Path) -> PathBuf {
    write_split(&root.join("train"), 6);
    write_split(&root.join("val"), 3);
    root.to_path_buf()
}

/// Seeded float weights for `mlp_tiny` over the fixture classes
pub fn write_pretrained(path: &Path) -> PathBuf {
    let model = build_classifier("mlp_tiny", CLASSES.len(), 11).unwrap();
    save_weights(&model, path).unwrap();
    path.to_path_buf()
}

/// Small, fast settings over a fixture dataset in `root`
pub fn tiny_config(root: &Path) -> RunConfig {
    RunConfig {
        data_path: write_dataset(&root.join("data")),
        model: "mlp_tiny".to_string(),
        batch_size: 4,
        eval_batch_size: 8,
        epochs: 2,
        num_observer_update_epochs: 1,
        num_batch_norm_update_epochs: 0,
        num_calibration_batches: 2,
        workers: 1,
        lr: 0.01,
        print_freq: 2,
        output_dir: Some(root.join("out")),
        weights: Some(write_pretrained(&root.join("mlp_tiny.safetensors"))),
        ..RunConfig::default()
    }
}
