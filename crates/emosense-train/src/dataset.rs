//! Labeled image folders: `<split>/<emotion>/<image files>`.

use emosense_core::preprocess::resize_to_face;
use emosense_core::EmotionLabel;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// 48×48 grayscale samples with their label indices.
#[derive(Debug, Default)]
pub struct LabeledSet {
    pub images: Vec<GrayImage>,
    pub labels: Vec<usize>,
    /// Labels whose folder did not exist.
    pub missing: Vec<EmotionLabel>,
    /// Files that could not be decoded.
    pub skipped: usize,
}

impl LabeledSet {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Sample count per label, in label-index order.
    pub fn class_counts(&self) -> [usize; EmotionLabel::COUNT] {
        let mut counts = [0; EmotionLabel::COUNT];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }
}

/// Load every label folder under `split_dir`.
///
/// A missing label folder contributes nothing and is recorded in
/// [`LabeledSet::missing`]. Undecodable files are skipped.
pub fn load_split(split_dir: &Path) -> Result<LabeledSet, DatasetError> {
    let mut set = LabeledSet::default();

    for label in EmotionLabel::ALL {
        let dir = split_dir.join(label.name());
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "label folder missing");
            set.missing.push(label);
            continue;
        }

        let mut files = list_files(&dir)?;
        files.sort();

        let before = set.len();
        for path in files {
            match image::open(&path) {
                Ok(img) => {
                    set.images.push(resize_to_face(&img.to_luma8()));
                    set.labels.push(label.index());
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    set.skipped += 1;
                }
            }
        }
        tracing::debug!(label = %label, samples = set.len() - before, "label folder loaded");
    }

    tracing::info!(
        split = %split_dir.display(),
        samples = set.len(),
        missing = set.missing.len(),
        skipped = set.skipped,
        "split loaded"
    );
    Ok(set)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let read_err = |source| DatasetError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
