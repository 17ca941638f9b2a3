pub mod fairings;
pub mod handlers;

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::workflow::jobs::{JobError, JobRegistry};

/// State shared by every handler.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub jobs: Arc<JobRegistry>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let jobs = JobRegistry::new(config.jobs_root(), config.max_retained_jobs);
        Self {
            config: Arc::new(config),
            jobs: Arc::new(jobs),
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: Status, error: impl Into<anyhow::Error>) -> Self {
        AppError {
            status,
            error: error.into(),
        }
    }

    pub fn from_job(err: JobError) -> Self {
        AppError::new(job_error_status(&err), err)
    }
}

pub fn job_error_status(err: &JobError) -> Status {
    match err {
        JobError::NoCurrentJob | JobError::NotFound(_) => Status::NotFound,
        JobError::InvalidId(_) => Status::BadRequest,
        JobError::Running(_) => Status::Conflict,
        JobError::Storage(_) => Status::InternalServerError,
    }
}

#[rocket::async_trait]
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'o> {
        let outer_msg = self.error.to_string();

        let chain: Vec<String> = self.error.chain().map(|e| e.to_string()).collect();

        let body = json!({
            "error": outer_msg,
            "chain": chain,
        })
        .to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl<E> From<E> for AppError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        AppError {
            status: Status::InternalServerError,
            error: anyhow::Error::from(err),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct GuardError {
    pub status: Status,
    pub error: anyhow::Error,
}

impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        AppError {
            status: err.status,
            error: err.error,
        }
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

impl<E> From<E> for GuardError
where
    anyhow::Error: From<E>,
{
    fn from(err: E) -> Self {
        GuardError {
            status: Status::BadRequest,
            error: anyhow::Error::from(err),
        }
    }
}
