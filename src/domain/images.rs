//! Usage: Local sample-image discovery and random selection for drive uploads.

use crate::shared::error::AppResult;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

pub(crate) const MAX_IMAGES_PER_RUN: usize = 3;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageScan {
    FolderMissing,
    NoImages,
    Found(Vec<PathBuf>),
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

pub(crate) fn scan_image_folder(folder: &Path) -> AppResult<ImageScan> {
    if !folder.is_dir() {
        return Ok(ImageScan::FolderMissing);
    }
    let entries = std::fs::read_dir(folder)
        .map_err(|e| format!("IO_ERROR: failed to read image folder {}: {e}", folder.display()))?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| format!("IO_ERROR: failed to read image folder entry: {e}"))?;
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();

    if images.is_empty() {
        return Ok(ImageScan::NoImages);
    }
    Ok(ImageScan::Found(images))
}

/// Up to `max` distinct entries, chosen uniformly without replacement.
pub(crate) fn sample_images(images: &[PathBuf], max: usize) -> Vec<PathBuf> {
    images
        .choose_multiple(&mut rand::thread_rng(), max.min(images.len()))
        .cloned()
        .collect()
}
