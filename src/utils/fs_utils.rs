use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::utils::allowed_file;

/// Removes `directory` and everything under it when present, then recreates it empty.
pub fn clear_directory(directory: impl AsRef<Path>) -> Result<()> {
    let directory = directory.as_ref();
    if directory.exists() {
        fs::remove_dir_all(directory)
            .with_context(|| format!("Failed to remove {}", directory.display()))?;
    }
    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create {}", directory.display()))?;
    Ok(())
}

/// Number of regular files anywhere under `directory`. A missing directory holds none.
pub fn count_files(directory: impl AsRef<Path>) -> usize {
    let directory = directory.as_ref();
    if !directory.exists() {
        return 0;
    }
    WalkDir::new(directory)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

/// Top-level subdirectories of `tagged_dir` mapped to the sorted image names inside each.
pub fn list_categories(tagged_dir: impl AsRef<Path>) -> Result<BTreeMap<String, Vec<String>>> {
    let tagged_dir = tagged_dir.as_ref();
    let mut categories = BTreeMap::new();
    if !tagged_dir.exists() {
        return Ok(categories);
    }

    for entry in fs::read_dir(tagged_dir)
        .with_context(|| format!("Failed to read {}", tagged_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let category = entry.file_name().to_string_lossy().into_owned();
        let mut images: Vec<String> = fs::read_dir(entry.path())?
            .filter_map(|image| image.ok())
            .filter(|image| image.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|image| image.file_name().to_string_lossy().into_owned())
            .filter(|name| allowed_file(name))
            .collect();
        images.sort();
        categories.insert(category, images);
    }

    Ok(categories)
}
