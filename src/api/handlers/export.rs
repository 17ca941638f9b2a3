use anyhow::Context;
use rocket::fs::NamedFile;
use rocket::get;
use rocket::http::Header;
use rocket::response::Responder;
use tokio::task::spawn_blocking;

use crate::api::fairings::guards::job::GuardJob;
use crate::api::{AppResult, GuardResult};
use crate::common::ARCHIVE_FILE_NAME;
use crate::workflow::processors::archive::zip_tagged_images;

#[derive(Responder)]
#[response(content_type = "application/zip")]
pub struct ZipDownload {
    inner: NamedFile,
    disposition: Header<'static>,
}

/// Rebuilds the job's archive from its tagged images and serves it as an attachment.
#[get("/download")]
pub async fn download(guard_job: GuardResult<GuardJob>) -> AppResult<ZipDownload> {
    let job = guard_job?.require()?;
    let dirs = job.dirs.clone();
    let zip_path = spawn_blocking(move || zip_tagged_images(&dirs.tagged, &dirs.zip)).await??;

    let inner = NamedFile::open(&zip_path)
        .await
        .with_context(|| format!("Failed to open archive {}", zip_path.display()))?;

    Ok(ZipDownload {
        inner,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", ARCHIVE_FILE_NAME),
        ),
    })
}
