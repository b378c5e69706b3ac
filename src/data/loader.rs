//! Batched, parallel image loading.

use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;
use rayon::ThreadPool;

use super::folder::ImageFolder;
use super::sampler::Sampler;
use super::transform::Transform;
use crate::{Error, Result};

/// One mini-batch of flattened images and class labels
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// `[batch, 3 * size * size]`
    pub inputs: Array2<f32>,
    pub targets: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Build the decode pool shared by all loaders
pub fn worker_pool(workers: usize) -> Result<Arc<ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("cuantizar-loader-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| Error::InvalidConfig(format!("failed to start {workers} loader threads: {e}")))
}

/// Iterates a dataset in batches, decoding each batch on a rayon pool
#[derive(Clone)]
pub struct DataLoader {
    dataset: Arc<ImageFolder>,
    sampler: Sampler,
    batch_size: usize,
    transform: Transform,
    pool: Arc<ThreadPool>,
    epoch: usize,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<ImageFolder>,
        sampler: Sampler,
        batch_size: usize,
        transform: Transform,
        pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            dataset,
            sampler,
            batch_size: batch_size.max(1),
            transform,
            pool,
            epoch: 0,
        }
    }

    pub fn dataset(&self) -> &ImageFolder {
        &self.dataset
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Select the shuffle and augmentation seed for the next pass
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    /// Number of batches per pass
    pub fn len(&self) -> usize {
        self.sampler.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Batch> {
        let width = self.transform.output_len();
        let samples: Vec<(Vec<f32>, usize)> = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&index| {
                    let (path, target) = &self.dataset.samples[index];
                    let pixels = self.transform.load(path, index, self.epoch)?;
                    Ok((pixels, *target))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut data = Vec::with_capacity(samples.len() * width);
        let mut targets = Vec::with_capacity(samples.len());
        for (pixels, target) in samples {
            data.extend(pixels);
            targets.push(target);
        }
        let inputs = Array2::from_shape_vec((targets.len(), width), data).map_err(|e| {
            Error::InvalidConfig(format!("inconsistent image size in batch: {e}"))
        })?;
        Ok(Batch { inputs, targets })
    }

    /// Batches of the current epoch, decoded lazily
    pub fn iter(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        let indices = self.sampler.indices(self.epoch);
        let batch_size = self.batch_size;
        let num_batches = indices.len().div_ceil(batch_size);
        (0..num_batches).map(move |b| {
            let end = ((b + 1) * batch_size).min(indices.len());
            self.load_batch(&indices[b * batch_size..end])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_dataset(root: &std::path::Path, per_class: usize) {
        for (class, color) in [("blue", [0, 0, 255]), ("red", [255, 0, 0])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                RgbImage::from_pixel(10, 10, Rgb(color))
                    .save(dir.join(format!("{i}.png")))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_batches_cover_sampler() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 3);
        let dataset = Arc::new(ImageFolder::scan(dir.path()).unwrap());
        let len = dataset.len();
        let loader = DataLoader::new(
            dataset,
            Sampler::Sequential { len },
            4,
            Transform::Eval { image_size: 8 },
            worker_pool(2).unwrap(),
        );

        assert_eq!(loader.len(), 2);
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches[0].inputs.dim(), (4, 3 * 64));
        assert_eq!(batches[1].len(), 2);
        let targets: Vec<usize> = batches.iter().flat_map(|b| b.targets.clone()).collect();
        assert_eq!(targets, vec![0, 0, 0, 1, 1, 1]);

        // Blue images have a high third channel
        assert!(batches[0].inputs[[0, 2 * 64]] > 2.0);
    }

    #[test]
    fn test_decode_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 1);
        std::fs::write(dir.path().join("red/broken.png"), b"garbage").unwrap();
        let dataset = Arc::new(ImageFolder::scan(dir.path()).unwrap());
        let len = dataset.len();
        let loader = DataLoader::new(
            dataset,
            Sampler::Sequential { len },
            8,
            Transform::Eval { image_size: 8 },
            worker_pool(1).unwrap(),
        );
        let result: Result<Vec<Batch>> = loader.iter().collect();
        assert!(matches!(result, Err(Error::Image { .. })));
    }
}
