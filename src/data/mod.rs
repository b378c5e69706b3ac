//! Image classification data pipeline
//!
//! `data_path/train` and `data_path/val` are image folders. Images are decoded
//! on a shared rayon pool, resized, normalized with ImageNet statistics and
//! flattened to CHW rows of a [`Batch`].

mod folder;
mod loader;
mod sampler;
mod transform;

pub use folder::{cache_path, ImageFolder, IMAGE_EXTENSIONS};
pub use loader::{worker_pool, Batch, DataLoader};
pub use sampler::Sampler;
pub use transform::{normalize_chw, Transform, IMAGENET_MEAN, IMAGENET_STD};

use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPool;
use tracing::info;

use crate::config::{cuantizar_home, RunConfig};
use crate::distributed::DistributedInfo;
use crate::{Error, Result};

/// Training and validation loaders for one run
pub struct DataSplits {
    pub train: DataLoader,
    pub val: DataLoader,
    pub pool: Arc<ThreadPool>,
}

impl DataSplits {
    /// Number of classes in the training split
    pub fn num_classes(&self) -> usize {
        self.train.dataset().num_classes()
    }

    /// Sequential loader over the first `count` training samples
    pub fn calibration_loader(&self, count: usize, batch_size: usize, image_size: u32) -> DataLoader {
        let dataset = Arc::new(self.train.dataset().clone());
        let sampler = Sampler::prefix(dataset.len(), count);
        DataLoader::new(
            dataset,
            sampler,
            batch_size,
            Transform::Eval { image_size },
            Arc::clone(&self.pool),
        )
    }
}

/// Scan both splits and build their loaders
///
/// Training is shuffled (per rank when distributed); validation is not.
/// Both splits must list the same class folders.
pub fn load_data(config: &RunConfig, dist: &DistributedInfo, image_size: u32) -> Result<DataSplits> {
    let cache_dir = config
        .cache_dataset
        .then(|| cuantizar_home().join("datasets"));
    let train_dir = config.data_path.join("train");
    let val_dir = config.data_path.join("val");

    info!("Loading training data");
    let start = Instant::now();
    let train = Arc::new(ImageFolder::load(&train_dir, cache_dir.as_deref())?);
    info!("Took {:.3}s", start.elapsed().as_secs_f64());

    info!("Loading validation data");
    let val = Arc::new(ImageFolder::load(&val_dir, cache_dir.as_deref())?);
    if val.classes != train.classes {
        return Err(Error::InvalidConfig(format!(
            "validation classes {:?} do not match training classes {:?}",
            val.classes, train.classes
        )));
    }

    info!("Creating data loaders");
    let (train_sampler, val_sampler) = if dist.distributed {
        (
            Sampler::Distributed {
                len: train.len(),
                num_replicas: dist.world_size,
                rank: dist.rank,
                shuffle: true,
                seed: config.seed,
            },
            Sampler::Distributed {
                len: val.len(),
                num_replicas: dist.world_size,
                rank: dist.rank,
                shuffle: false,
                seed: config.seed,
            },
        )
    } else {
        (
            Sampler::Random {
                len: train.len(),
                seed: config.seed,
            },
            Sampler::Sequential { len: val.len() },
        )
    };

    let pool = worker_pool(config.workers)?;
    Ok(DataSplits {
        train: DataLoader::new(
            train,
            train_sampler,
            config.batch_size,
            Transform::Train {
                image_size,
                seed: config.seed,
            },
            Arc::clone(&pool),
        ),
        val: DataLoader::new(
            val,
            val_sampler,
            config.eval_batch_size,
            Transform::Eval { image_size },
            Arc::clone(&pool),
        ),
        pool,
    })
}
