pub mod jobs;
pub mod processors;
pub mod types;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use std::time::Instant;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::common::DETECTION_PROGRESS_WEIGHT;
use crate::common::errors::handle_error;
use crate::config::AppConfig;
use crate::utils::fs_utils::count_files;
use crate::workflow::jobs::{JobError, JobRecord, JobRegistry};
use crate::workflow::processors::script::{
    ScriptInvocation, ScriptOutcome, ScriptStep, run_script,
};

/// Captured outcomes of one detection → tagging run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub steps: Vec<ScriptOutcome>,
}

impl PipelineReport {
    /// The step that stopped the run, if any.
    pub fn failure(&self) -> Option<&ScriptOutcome> {
        self.steps.iter().find(|step| !step.success)
    }
}

/// Runs detection then tagging for `id`, recording the result on the job.
///
/// A failing script is reported through the returned [`PipelineReport`]
/// (and the job ends up `failed`). `Err` means the job could not be started
/// or its directories could not be prepared.
pub async fn process_job(
    config: &AppConfig,
    jobs: &JobRegistry,
    id: Uuid,
) -> Result<PipelineReport, JobError> {
    let guard = jobs.begin_run(&id)?;
    let job = jobs.get(&id).ok_or(JobError::NotFound(id))?;
    let start_time = Instant::now();

    let mut steps = Vec::new();
    match run_pipeline(config, &job, &mut steps).await {
        Ok(()) => {
            let report = PipelineReport { steps };
            let error = report.failure().and_then(|step| step.failure_reason());
            match &error {
                Some(reason) => warn!(duration = &*format!("{:?}", start_time.elapsed());
                    "Job {} failed: {}",
                    guard.id(),
                    reason
                ),
                None => info!(duration = &*format!("{:?}", start_time.elapsed());
                    "Job {} processed",
                    guard.id()
                ),
            }
            guard.finish(report.steps.clone(), error);
            Ok(report)
        }
        Err(err) => {
            let err = handle_error(err.context(format!("Failed to process job {}", id)));
            // Steps that completed before the failure stay on the job record.
            guard.finish(steps, Some(format!("{:#}", err)));
            Err(JobError::Storage(err))
        }
    }
}

/// Clears previous outputs, then runs the detection and tagging scripts,
/// pushing each outcome onto `steps`. Tagging is skipped when detection fails.
async fn run_pipeline(
    config: &AppConfig,
    job: &JobRecord,
    steps: &mut Vec<ScriptOutcome>,
) -> Result<()> {
    let dirs = job.dirs.clone();
    spawn_blocking(move || dirs.clear_outputs())
        .await
        .map_err(|e| anyhow!("Join error: {}", e))?
        .context("Failed to clear previous results")?;

    let envs = job.dirs.script_envs(&job.id.to_string())?;

    for (step, command) in [
        (ScriptStep::Detection, &config.detect_command),
        (ScriptStep::Tagging, &config.tag_command),
    ] {
        let outcome = run_script(ScriptInvocation {
            step,
            command,
            working_dir: &config.script_dir,
            envs: envs.clone(),
            timeout: config.script_timeout(),
        })
        .await?;
        let success = outcome.success;
        steps.push(outcome);
        if !success {
            break;
        }
    }

    Ok(())
}

/// Estimated completion for a job: files seen in its detection directory,
/// weighted against the upload baseline.
pub async fn job_progress(job: &JobRecord) -> Result<String> {
    if job.n_files == 0 {
        return Ok(format_progress(0, 0));
    }
    let detect = job.dirs.detect.clone();
    let detected = spawn_blocking(move || count_files(detect))
        .await
        .map_err(|e| anyhow!("Join error: {}", e))?;
    Ok(format_progress(detected, job.n_files))
}

/// `detected * 50 / n_files` rounded to two decimals, printed the way the
/// frontend expects (`15.0`, `33.33`, `3.12` for an exact `3.125`). `0`
/// without a baseline.
pub fn format_progress(detected: usize, n_files: usize) -> String {
    if n_files == 0 {
        return "0".to_string();
    }
    let raw = detected as f64 * DETECTION_PROGRESS_WEIGHT / n_files as f64;
    // Fixed-precision formatting rounds the exact binary value, ties to even.
    let rounded: f64 = format!("{:.2}", raw).parse().unwrap_or(raw);
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}
