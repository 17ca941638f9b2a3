use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Category code to human readable label.
pub type SpeciesMapping = BTreeMap<String, String>;

/// Reads the mapping file (a JSON object of strings) and layers `overrides` on top.
pub fn load_species_mapping(
    path: impl AsRef<Path>,
    overrides: &BTreeMap<String, String>,
) -> Result<SpeciesMapping> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open species mapping {}", path.display()))?;
    let mut mapping: SpeciesMapping = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse species mapping {}", path.display()))?;
    mapping.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(mapping)
}
