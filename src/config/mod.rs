use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "./config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Root of all working directories; jobs live under `<dataRoot>/jobs`.
    pub data_root: PathBuf,
    /// Landing page, review page and `/static` assets.
    pub static_dir: PathBuf,
    /// JSON object mapping category codes to labels.
    pub species_mapping_path: PathBuf,
    /// Entries merged over the mapping file.
    pub species_overrides: BTreeMap<String, String>,
    /// Working directory of the detection and tagging scripts.
    pub script_dir: PathBuf,
    pub detect_command: Vec<String>,
    pub tag_command: Vec<String>,
    /// Kill a script that runs longer than this. `None` waits forever.
    pub script_timeout_secs: Option<u64>,
    /// Run detection and tagging as part of the upload request.
    pub auto_process: bool,
    pub max_retained_jobs: usize,
    /// Upload size limit (MB)
    pub upload_limit_mb: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            static_dir: PathBuf::from("./static"),
            species_mapping_path: PathBuf::from("./species_mapping.json"),
            species_overrides: BTreeMap::new(),
            script_dir: PathBuf::from("."),
            detect_command: vec!["python".to_string(), "detect.py".to_string()],
            tag_command: vec!["python".to_string(), "tag_images.py".to_string()],
            script_timeout_secs: None,
            auto_process: false,
            max_retained_jobs: 8,
            upload_limit_mb: 2048,
        }
    }
}

impl AppConfig {
    pub fn jobs_root(&self) -> PathBuf {
        self.data_root.join(crate::common::JOBS_DIR_NAME)
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_secs.map(Duration::from_secs)
    }
}

/// `CATRAT_*` environment variables that take precedence over the config file.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    data_root: Option<PathBuf>,
    static_dir: Option<PathBuf>,
    species_mapping_path: Option<PathBuf>,
    script_dir: Option<PathBuf>,
    detect_command: Option<Vec<String>>,
    tag_command: Option<Vec<String>>,
    script_timeout_secs: Option<u64>,
    auto_process: Option<bool>,
    max_retained_jobs: Option<usize>,
    upload_limit_mb: Option<u64>,
}

impl EnvOverrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(v) = self.data_root {
            config.data_root = v;
        }
        if let Some(v) = self.static_dir {
            config.static_dir = v;
        }
        if let Some(v) = self.species_mapping_path {
            config.species_mapping_path = v;
        }
        if let Some(v) = self.script_dir {
            config.script_dir = v;
        }
        if let Some(v) = self.detect_command.filter(|c| !c.is_empty()) {
            config.detect_command = v;
        }
        if let Some(v) = self.tag_command.filter(|c| !c.is_empty()) {
            config.tag_command = v;
        }
        if let Some(v) = self.script_timeout_secs {
            config.script_timeout_secs = Some(v);
        }
        if let Some(v) = self.auto_process {
            config.auto_process = v;
        }
        if let Some(v) = self.max_retained_jobs {
            config.max_retained_jobs = v;
        }
        if let Some(v) = self.upload_limit_mb {
            config.upload_limit_mb = v;
        }
    }
}

/// Reads the config file named by `CATRAT_CONFIG` (or `./config.json`) when it
/// exists, then layers `CATRAT_*` environment variables on top.
pub fn load_config() -> Result<AppConfig> {
    dotenv().ok();

    let path = std::env::var("CATRAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = read_config_file(&path)?;

    let overrides = envy::prefixed("CATRAT_")
        .from_env::<EnvOverrides>()
        .context("Failed to parse CATRAT_* environment variables")?;
    overrides.apply(&mut config);

    Ok(config)
}

fn read_config_file(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => {
            let config = serde_json::from_reader(file)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No config file at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
        Err(err) => {
            Err(err).with_context(|| format!("Failed to open config file {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "autoProcess": true, "tagCommand": ["sh", "tag.sh"] }"#)
            .unwrap();

        let config = read_config_file(&path).unwrap();
        assert!(config.auto_process);
        assert_eq!(config.tag_command, vec!["sh", "tag.sh"]);
        assert_eq!(config.detect_command, AppConfig::default().detect_command);
        assert_eq!(config.max_retained_jobs, 8);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn env_overrides_replace_only_present_fields() {
        let mut config = AppConfig::default();
        EnvOverrides {
            auto_process: Some(true),
            detect_command: Some(vec![]),
            upload_limit_mb: Some(16),
            ..Default::default()
        }
        .apply(&mut config);

        assert!(config.auto_process);
        assert_eq!(config.upload_limit_mb, 16);
        assert_eq!(config.detect_command, AppConfig::default().detect_command);
    }
}
