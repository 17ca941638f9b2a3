use anyhow::Result;
use path_clean::PathClean;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::common::{DETECT_DIR_NAME, TAGGED_DIR_NAME, UPLOAD_DIR_NAME, ZIP_DIR_NAME};
use crate::utils::fs_utils::clear_directory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Files uploaded, waiting for a submit.
    Pending,
    Running,
    Done,
    Failed,
}

// ────────────────────────────────────────────────────────────────
// JobDirs - the working directories owned by a single job
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JobDirs {
    pub root: PathBuf,
    pub upload: PathBuf,
    pub detect: PathBuf,
    pub tagged: PathBuf,
    pub zip: PathBuf,
}

impl JobDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            upload: root.join(UPLOAD_DIR_NAME),
            detect: root.join(DETECT_DIR_NAME),
            tagged: root.join(TAGGED_DIR_NAME),
            zip: root.join(ZIP_DIR_NAME),
            root,
        }
    }

    /// Wipes and recreates every working directory of the job.
    pub fn clear_all(&self) -> Result<()> {
        for dir in [&self.upload, &self.detect, &self.tagged, &self.zip] {
            clear_directory(dir)?;
        }
        Ok(())
    }

    /// Wipes the directories the scripts write into.
    pub fn clear_outputs(&self) -> Result<()> {
        clear_directory(&self.detect)?;
        clear_directory(&self.tagged)?;
        Ok(())
    }

    /// Environment handed to the detection and tagging scripts.
    pub fn script_envs(&self, job_id: &str) -> Result<Vec<(&'static str, OsString)>> {
        Ok(vec![
            ("CATRAT_JOB_ID", OsString::from(job_id)),
            ("CATRAT_UPLOAD_DIR", absolute(&self.upload)?.into_os_string()),
            ("CATRAT_DETECT_DIR", absolute(&self.detect)?.into_os_string()),
            ("CATRAT_TAGGED_DIR", absolute(&self.tagged)?.into_os_string()),
        ])
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?.clean())
}
