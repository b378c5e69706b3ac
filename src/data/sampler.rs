//! Index samplers.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Order in which a loader visits dataset indices
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sampler {
    /// `0..len` in order
    Sequential { len: usize },
    /// A permutation of `0..len`, reshuffled every epoch
    Random { len: usize, seed: u64 },
    /// This rank's shard of a padded (and optionally shuffled) index list
    Distributed {
        len: usize,
        num_replicas: usize,
        rank: usize,
        shuffle: bool,
        seed: u64,
    },
    /// The given indices in order
    Subset { indices: Vec<usize> },
}

fn permutation(len: usize, seed: u64, epoch: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    indices.shuffle(&mut rng);
    indices
}

impl Sampler {
    /// Sequential sampler over the first `count` indices (clamped to `len`)
    pub fn prefix(len: usize, count: usize) -> Self {
        Self::Subset {
            indices: (0..count.min(len)).collect(),
        }
    }

    /// Indices visited in `epoch`
    pub fn indices(&self, epoch: usize) -> Vec<usize> {
        match self {
            Self::Sequential { len } => (0..*len).collect(),
            Self::Random { len, seed } => permutation(*len, *seed, epoch),
            Self::Distributed {
                len,
                num_replicas,
                rank,
                shuffle,
                seed,
            } => {
                if *len == 0 {
                    return Vec::new();
                }
                let mut indices = if *shuffle {
                    permutation(*len, *seed, epoch)
                } else {
                    (0..*len).collect()
                };
                let replicas = (*num_replicas).max(1);
                let total = len.div_ceil(replicas) * replicas;
                let padding: Vec<usize> = indices.iter().copied().cycle().take(total - len).collect();
                indices.extend(padding);
                indices
                    .into_iter()
                    .skip(*rank)
                    .step_by(replicas)
                    .collect()
            }
            Self::Subset { indices } => indices.clone(),
        }
    }

    /// Number of indices per epoch
    pub fn len(&self) -> usize {
        match self {
            Self::Sequential { len } | Self::Random { len, .. } => *len,
            Self::Distributed {
                len, num_replicas, ..
            } => len.div_ceil((*num_replicas).max(1)),
            Self::Subset { indices } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
