//! Image-folder datasets: one sub-directory per class.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::io::{read_json, write_json_atomic};
use crate::{Error, Result};

/// File extensions the decoder understands
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Scanned image-folder split
///
/// Class indices follow the sorted class directory names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageFolder {
    pub root: PathBuf,
    pub classes: Vec<String>,
    /// `(path, class index)` in sorted order
    pub samples: Vec<(PathBuf, usize)>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn collect_images(dir: &Path, class: usize, out: &mut Vec<(PathBuf, usize)>) -> Result<()> {
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            collect_images(&path, class, out)?;
        } else if is_image(&path) {
            out.push((path, class));
        }
    }
    Ok(())
}

impl ImageFolder {
    /// Walk `root` and index every image under each class directory
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let class_dirs: Vec<PathBuf> = sorted_entries(root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();

        let mut classes = Vec::with_capacity(class_dirs.len());
        let mut samples = Vec::new();
        for (class, dir) in class_dirs.iter().enumerate() {
            classes.push(
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            collect_images(dir, class, &mut samples)?;
        }

        if samples.is_empty() {
            return Err(Error::EmptyDataset(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
        })
    }

    /// Scan `root`, reusing (or writing) an index under `cache_dir` when given
    pub fn load(root: impl AsRef<Path>, cache_dir: Option<&Path>) -> Result<Self> {
        let root = root.as_ref();
        let Some(cache_dir) = cache_dir else {
            return Self::scan(root);
        };
        let cache_path = cache_path(cache_dir, root);
        if cache_path.exists() {
            info!("Loading dataset index for {} from {}", root.display(), cache_path.display());
            return read_json(&cache_path);
        }
        let folder = Self::scan(root)?;
        info!("Saving dataset index for {} to {}", root.display(), cache_path.display());
        write_json_atomic(&folder, &cache_path)?;
        Ok(folder)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// `<cache_dir>/<sha256(root)>.json`
pub fn cache_path(cache_dir: &Path, root: &Path) -> PathBuf {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    cache_dir.join(format!("{digest:x}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_sorts_classes_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("zebra/b.png"));
        touch(&dir.path().join("zebra/a.JPG"));
        touch(&dir.path().join("ant/nested/c.jpeg"));
        touch(&dir.path().join("ant/notes.txt"));

        let folder = ImageFolder::scan(dir.path()).unwrap();
        assert_eq!(folder.classes, vec!["ant", "zebra"]);
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.samples[0].1, 0);
        assert!(folder.samples[1].0.ends_with("zebra/a.JPG"));
        assert_eq!(folder.samples[2].1, 1);
    }

    #[test]
    fn test_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty_class")).unwrap();
        assert!(matches!(
            ImageFolder::scan(dir.path()),
            Err(Error::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_cache_is_written_then_reused() {
        let data = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        touch(&data.path().join("cat/1.png"));

        let first = ImageFolder::load(data.path(), Some(cache.path())).unwrap();
        let cached = cache_path(cache.path(), data.path());
        assert!(cached.exists());

        // A new image is ignored while the cached index exists
        touch(&data.path().join("cat/2.png"));
        let second = ImageFolder::load(data.path(), Some(cache.path())).unwrap();
        assert_eq!(first, second);
        assert_eq!(ImageFolder::load(data.path(), None).unwrap().len(), 2);
    }
}
