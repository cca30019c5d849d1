//! Building-map image side channel.
//!
//! Building-map payloads reference level images by URL into the service's
//! asset cache. Inlining them would blow up the JSON file, so capture records
//! a manifest of cache files instead; on save they are copied into a sibling
//! `<capture-stem>_images/` directory, and replay restores them into the
//! cache directory before injecting anything.

use crate::capture::CaptureMetadata;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Scan a building-map payload for cached level images.
///
/// Returns a copy of the payload where each image resolved against
/// `cache_dir` is tagged with `_captured_file`; resolved files are added to
/// `manifest` as `{filename → cache path}`.
pub fn capture_building_map_images(
    data: &Value,
    cache_dir: &Path,
    manifest: &mut BTreeMap<String, PathBuf>,
) -> Value {
    let mut data = data.clone();

    let levels = match data.get_mut("levels").and_then(Value::as_array_mut) {
        Some(levels) => levels,
        None => return data,
    };

    for level in levels {
        let images = match level.get_mut("images").and_then(Value::as_array_mut) {
            Some(images) => images,
            None => continue,
        };
        for img in images {
            let url = match img.get("data").and_then(Value::as_str) {
                Some(u) if u.starts_with("http") => u.to_string(),
                _ => continue,
            };

            let rel_path = match cache_relative_path(&url) {
                Some(p) => p,
                None => continue,
            };
            let filename = match rel_path.file_name().and_then(|n| n.to_str()) {
                Some(f) => f.to_string(),
                None => continue,
            };

            let cache_file = cache_dir.join(&rel_path);
            if cache_file.exists() {
                manifest.insert(filename.clone(), cache_file);
                if let Some(obj) = img.as_object_mut() {
                    obj.insert("_captured_file".to_string(), Value::String(filename.clone()));
                }
                info!(file = %filename, "captured building-map image");
            } else {
                warn!(path = %cache_file.display(), "cached image file not found");
            }
        }
    }

    data
}

/// Extract the path below the `cache` segment of an asset URL
/// (`http://host/cache/building/l1.png` → `building/l1.png`).
fn cache_relative_path(url: &str) -> Option<PathBuf> {
    let path = url.splitn(2, "://").nth(1)?.split_once('/')?.1;
    let parts: Vec<&str> = path.split('/').collect();
    let cache_idx = parts.iter().position(|p| *p == "cache")?;
    let rel: Vec<&str> = parts[cache_idx + 1..].to_vec();
    if rel.is_empty() || rel.last().map_or(true, |f| f.is_empty()) {
        return None;
    }
    Some(rel.iter().collect())
}

/// Copy manifest files into the images directory next to the capture file.
///
/// A single failed copy is logged and skipped; the capture itself is still
/// written.
pub fn copy_captured_images(
    manifest: &BTreeMap<String, PathBuf>,
    images_dir: &Path,
) -> Result<Vec<String>> {
    fs::create_dir_all(images_dir).context("Failed to create images directory")?;

    let mut copied = Vec::with_capacity(manifest.len());
    for (filename, source) in manifest {
        let dest = images_dir.join(filename);
        match fs::copy(source, &dest) {
            Ok(_) => {
                info!(path = %dest.display(), "image saved");
                copied.push(filename.clone());
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "failed to copy image");
            }
        }
    }

    Ok(copied)
}

/// Restore captured images next to a loaded capture file into the service
/// cache directory, so injected building-map references resolve again.
pub fn restore_images(
    metadata: &CaptureMetadata,
    capture_path: &Path,
    cache_dir: &Path,
) -> Result<usize> {
    if metadata.captured_images.is_empty() {
        return Ok(0);
    }

    let parent = capture_path.parent().unwrap_or_else(|| Path::new("."));

    // images_dir may have been recorded on another machine; only its final
    // component is trusted, resolved against the capture file's directory.
    let images_dir = match &metadata.images_dir {
        Some(dir) => {
            let name = Path::new(dir)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(dir));
            parent.join(name)
        }
        None => {
            let stem = capture_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("captured_data");
            parent.join(format!("{}_images", stem))
        }
    };

    if !images_dir.exists() {
        warn!(path = %images_dir.display(), "images directory not found, skipping restore");
        return Ok(0);
    }

    let building_cache = cache_dir.join("building");
    fs::create_dir_all(&building_cache).context("Failed to create cache directory")?;

    let mut restored = 0;
    for filename in &metadata.captured_images {
        let src = images_dir.join(filename);
        let dst = building_cache.join(filename);
        if src.exists() {
            fs::copy(&src, &dst)
                .with_context(|| format!("Failed to restore image {}", filename))?;
            restored += 1;
        } else {
            warn!(file = %filename, "captured image missing from images directory");
        }
    }

    info!(restored, cache = %building_cache.display(), "restored captured images");
    Ok(restored)
}
