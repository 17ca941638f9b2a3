use anyhow::anyhow;
use rocket::State;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{get, post};
use std::collections::BTreeMap;
use tokio::task::spawn_blocking;

use crate::api::fairings::guards::job::GuardJob;
use crate::api::handlers::media::review_redirect;
use crate::api::{AppContext, AppError, AppResult, GuardResult};
use crate::models::dto::catalog::CatalogView;
use crate::utils::fs_utils::list_categories;
use crate::workflow::jobs::JobRecord;
use crate::workflow::processors::species::load_species_mapping;
use crate::workflow::{PipelineReport, job_progress, process_job};

const STDERR_TAIL_LINES: usize = 20;

/// Turns a failed script run into an error response carrying the script's
/// exit status and the end of its stderr.
pub fn ensure_succeeded(report: &PipelineReport) -> AppResult<()> {
    let Some(failed) = report.failure() else {
        return Ok(());
    };
    let reason = failed
        .failure_reason()
        .unwrap_or_else(|| format!("{} step failed", failed.step));
    let lines: Vec<&str> = failed.stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    let error = if tail.is_empty() {
        anyhow!(reason)
    } else {
        anyhow!(tail).context(reason)
    };
    Err(AppError::from(error))
}

#[post("/submit")]
pub async fn submit(
    context: &State<AppContext>,
    guard_job: GuardResult<GuardJob>,
) -> AppResult<Redirect> {
    let job = guard_job?.require()?;
    let report = process_job(&context.config, &context.jobs, job.id)
        .await
        .map_err(AppError::from_job)?;
    ensure_succeeded(&report)?;
    Ok(review_redirect(job.id))
}

#[get("/try")]
pub async fn try_again(
    context: &State<AppContext>,
    guard_job: GuardResult<GuardJob>,
) -> AppResult<Redirect> {
    if let Some(job) = guard_job?.0 {
        let jobs = context.jobs.clone();
        spawn_blocking(move || jobs.reset(&job.id))
            .await?
            .map_err(AppError::from_job)?;
    }
    Ok(Redirect::to("/"))
}

#[get("/get_progress")]
pub async fn get_progress(guard_job: GuardResult<GuardJob>) -> AppResult<String> {
    match guard_job?.0 {
        Some(job) => Ok(job_progress(&job).await?),
        None => Ok("0".to_string()),
    }
}

#[get("/get/catrat")]
pub async fn get_catrat(
    context: &State<AppContext>,
    guard_job: GuardResult<GuardJob>,
) -> AppResult<Json<CatalogView>> {
    let job = guard_job?.0;
    let config = context.config.clone();
    let view = spawn_blocking(move || -> anyhow::Result<CatalogView> {
        let species_mapping =
            load_species_mapping(&config.species_mapping_path, &config.species_overrides)?;
        let categorized_images = match &job {
            Some(job) => list_categories(&job.dirs.tagged)?,
            None => BTreeMap::new(),
        };
        Ok(CatalogView::new(
            job.map(|job| (job.id, job.status)),
            categorized_images,
            species_mapping,
        ))
    })
    .await??;
    Ok(Json(view))
}

#[get("/get/jobs")]
pub async fn get_jobs(context: &State<AppContext>) -> Json<Vec<JobRecord>> {
    Json(context.jobs.list())
}

#[get("/get/job")]
pub async fn get_job(guard_job: GuardResult<GuardJob>) -> AppResult<Json<JobRecord>> {
    Ok(Json(guard_job?.require()?))
}
