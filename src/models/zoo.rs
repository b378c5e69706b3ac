//! Named model recipes and pretrained-weight resolution.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use super::classifier::{FeatureBlock, FloatClassifier};
use crate::nn::{BatchNorm1d, Linear};
use crate::{Error, Result};

/// Architecture recipe for a zoo model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelRecipe {
    /// Registry name
    pub name: &'static str,
    /// Input images are resized to `image_size x image_size`
    pub image_size: usize,
    /// Widths of the feature blocks
    pub hidden: &'static [usize],
}

impl ModelRecipe {
    /// Flattened RGB input width
    pub fn input_dim(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    /// Width of the last feature block
    pub fn out_channels(&self) -> usize {
        self.hidden.last().copied().unwrap_or_else(|| self.input_dim())
    }
}

/// All registered recipes
pub const ZOO: &[ModelRecipe] = &[
    ModelRecipe {
        name: "mlp_tiny",
        image_size: 8,
        hidden: &[32],
    },
    ModelRecipe {
        name: "mlp_small",
        image_size: 32,
        hidden: &[512, 256],
    },
    ModelRecipe {
        name: "mlp_base",
        image_size: 32,
        hidden: &[1024, 1280],
    },
];

/// Look up a recipe by name
pub fn recipe(name: &str) -> Result<&'static ModelRecipe> {
    ZOO.iter()
        .find(|r| r.name == name)
        .ok_or_else(|| Error::UnknownModel {
            name: name.to_string(),
            available: ZOO.iter().map(|r| r.name).collect::<Vec<_>>().join(", "),
        })
}

/// Build a freshly initialised classifier
///
/// Initialisation is deterministic in `seed`.
pub fn build_classifier(name: &str, num_classes: usize, seed: u64) -> Result<FloatClassifier> {
    let recipe = recipe(name)?;
    if num_classes == 0 {
        return Err(Error::InvalidConfig(
            "classifier needs at least one class".to_string(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(seed);

    let mut features = Vec::with_capacity(recipe.hidden.len());
    let mut width = recipe.input_dim();
    for &hidden in recipe.hidden {
        features.push(FeatureBlock {
            linear: Linear::new(width, hidden, &mut rng),
            bn: BatchNorm1d::new(hidden),
        });
        width = hidden;
    }
    let classifier = Linear::new(width, num_classes, &mut rng);

    Ok(FloatClassifier {
        arch: recipe.name.to_string(),
        image_size: recipe.image_size,
        features,
        classifier,
    })
}

/// Where pretrained weights for `name` are looked up by default
pub fn default_weights_path(name: &str) -> PathBuf {
    crate::config::cuantizar_home()
        .join("models")
        .join(format!("{name}.safetensors"))
}

/// Pick the pretrained weights file: the explicit path, else the default location
///
/// Returns `None` when neither exists.
pub fn resolve_pretrained(name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let fallback = default_weights_path(name);
            fallback.exists().then_some(fallback)
        }
    }
}
