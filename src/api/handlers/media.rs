use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use path_clean::PathClean;
use rocket::State;
use rocket::form::{Errors, Form, FromForm};
use rocket::fs::{NamedFile, TempFile};
use rocket::http::Status;
use rocket::request::FlashMessage;
use rocket::response::{Flash, Redirect};
use rocket::serde::json::Json;
use rocket::{get, post};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::api::fairings::guards::job::GuardJob;
use crate::api::handlers::system::ensure_succeeded;
use crate::api::{AppContext, AppError, AppResult, GuardResult};
use crate::models::dto::flash::FlashView;
use crate::utils::fs_utils::count_files;
use crate::utils::{allowed_file, secure_filename};
use crate::workflow::process_job;

// ────────────────────────────────────────────────────────────────
// Pages
// ────────────────────────────────────────────────────────────────

#[get("/")]
pub async fn index(context: &State<AppContext>) -> Option<NamedFile> {
    NamedFile::open(context.config.static_dir.join("index.html"))
        .await
        .ok()
}

#[get("/catrat")]
pub async fn catrat(context: &State<AppContext>) -> Option<NamedFile> {
    NamedFile::open(context.config.static_dir.join("catrat.html"))
        .await
        .ok()
}

#[get("/display_image/<file_path..>")]
pub async fn display_image(
    guard_job: GuardResult<GuardJob>,
    file_path: PathBuf,
) -> AppResult<NamedFile> {
    let job = guard_job?.require()?;
    let tagged_dir = job.dirs.tagged.clean();
    let image_path = tagged_dir.join(&file_path).clean();
    if !image_path.starts_with(&tagged_dir) {
        return Err(AppError::new(
            Status::Forbidden,
            anyhow!("Path escapes the tagged directory: {}", file_path.display()),
        ));
    }

    NamedFile::open(&image_path).await.map_err(|error| {
        AppError::new(
            Status::NotFound,
            anyhow::Error::from(error)
                .context(format!("Failed to open tagged image {}", file_path.display())),
        )
    })
}

#[get("/get/flash")]
pub fn get_flash(flash: Option<FlashMessage<'_>>) -> Option<Json<FlashView>> {
    flash.map(|flash| {
        Json(FlashView {
            kind: flash.kind().to_string(),
            message: flash.message().to_string(),
        })
    })
}

// ────────────────────────────────────────────────────────────────
// Upload
// ────────────────────────────────────────────────────────────────

#[derive(FromForm, Debug)]
pub struct UploadForm<'r> {
    /// Files in the order the client sent them
    #[field(name = "file")]
    pub files: Vec<TempFile<'r>>,

    /// Optional lastModified timestamps (ms) matching the file order
    #[field(name = "lastModified")]
    pub last_modified: Vec<u64>,
}

type UploadResponse = Result<Redirect, Flash<Redirect>>;

#[post("/", data = "<form>")]
pub async fn upload_index(
    context: &State<AppContext>,
    form: Result<Form<UploadForm<'_>>, Errors<'_>>,
) -> AppResult<UploadResponse> {
    upload_files(context, form).await
}

#[post("/upload", data = "<form>")]
pub async fn upload(
    context: &State<AppContext>,
    form: Result<Form<UploadForm<'_>>, Errors<'_>>,
) -> AppResult<UploadResponse> {
    upload_files(context, form).await
}

/// Saves the accepted files into a fresh job. In auto-process mode the job is
/// processed before the redirect.
async fn upload_files(
    context: &AppContext,
    form: Result<Form<UploadForm<'_>>, Errors<'_>>,
) -> AppResult<UploadResponse> {
    let UploadForm {
        mut files,
        last_modified,
    } = match form {
        Ok(form) => form.into_inner(),
        Err(errors) => {
            warn!("Rejected upload form: {}", errors);
            return Ok(Err(no_file_part()));
        }
    };
    if files.is_empty() {
        return Ok(Err(no_file_part()));
    }

    let last_modified = if last_modified.len() == files.len() {
        Some(last_modified)
    } else {
        if !last_modified.is_empty() {
            warn!("Mismatch between number of files and lastModified timestamps, ignoring timestamps");
        }
        None
    };

    let jobs = context.jobs.clone();
    let job = spawn_blocking(move || jobs.create()).await??;

    for (i, file) in files.iter_mut().enumerate() {
        let start_time = Instant::now();
        let raw_name = get_filename(file);
        if !allowed_file(&raw_name) {
            warn!("Skipped '{}': extension not allowed", raw_name);
            continue;
        }
        let filename = secure_filename(&raw_name);
        if filename.is_empty() {
            warn!("Skipped '{}': nothing left after sanitizing the name", raw_name);
            continue;
        }

        let mtime = last_modified.as_ref().map(|times| times[i]);
        let final_path = save_file(file, &job.dirs.upload, &filename, mtime).await?;
        info!(duration = &*format!("{:?}", start_time.elapsed());
            "Saved file to {}",
            final_path.display()
        );
    }

    let upload_dir = job.dirs.upload.clone();
    let n_files = spawn_blocking(move || count_files(upload_dir)).await?;
    context
        .jobs
        .set_baseline(&job.id, n_files)
        .map_err(AppError::from_job)?;
    info!("Job {} holds {} uploaded files", job.id, n_files);

    if context.config.auto_process {
        let report = process_job(&context.config, &context.jobs, job.id)
            .await
            .map_err(AppError::from_job)?;
        ensure_succeeded(&report)?;
    }

    Ok(Ok(review_redirect(job.id)))
}

pub fn review_redirect(id: Uuid) -> Redirect {
    Redirect::to(format!("/catrat?job={}", id))
}

fn no_file_part() -> Flash<Redirect> {
    Flash::error(Redirect::to("/"), "No file part")
}

/// The filename exactly as the client sent it; sanitized separately.
fn get_filename(file: &TempFile<'_>) -> String {
    file.raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default()
}

async fn save_file(
    file: &mut TempFile<'_>,
    upload_dir: &Path,
    filename: &str,
    last_modified: Option<u64>,
) -> Result<PathBuf> {
    let unique_id = Uuid::new_v4();
    let path_tmp = upload_dir.join(format!(".{}-{}.tmp", filename, unique_id));

    file.move_copy_to(&path_tmp)
        .await
        .with_context(|| format!("Failed to store upload {}", filename))?;

    let path_final = upload_dir.join(filename);
    spawn_blocking(move || -> Result<PathBuf> {
        if let Some(last_modified) = last_modified {
            set_last_modified_time(&path_tmp, last_modified)?;
        }
        std::fs::rename(&path_tmp, &path_final)?;
        Ok(path_final)
    })
    .await?
}

fn set_last_modified_time(path: impl AsRef<Path>, last_modified_time: u64) -> Result<()> {
    let mtime = filetime::FileTime::from_unix_time((last_modified_time / 1000) as i64, 0);
    filetime::set_file_mtime(path, mtime)?;
    Ok(())
}
