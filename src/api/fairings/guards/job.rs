use anyhow::anyhow;
use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use uuid::Uuid;

use crate::api::fairings::utils::extract_job_id;
use crate::api::{AppContext, AppError, AppResult, GuardError, job_error_status};
use crate::workflow::jobs::{JobError, JobRecord};

/// The job a request addresses: the `job` query parameter, or the current job.
/// Holds `None` only when no id was given and no job exists yet.
pub struct GuardJob(pub Option<JobRecord>);

impl GuardJob {
    pub fn require(self) -> AppResult<JobRecord> {
        self.0.ok_or_else(|| AppError::from_job(JobError::NoCurrentJob))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for GuardJob {
    type Error = GuardError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(context) = req.rocket().state::<AppContext>() else {
            return Outcome::Error((
                Status::InternalServerError,
                GuardError {
                    status: Status::InternalServerError,
                    error: anyhow!("Application state is not managed"),
                },
            ));
        };

        let id: Option<Uuid> = match extract_job_id(req) {
            Ok(id) => id,
            Err(err) => return job_error_outcome(err),
        };

        match context.jobs.resolve(id) {
            Ok(record) => Outcome::Success(GuardJob(Some(record))),
            Err(JobError::NoCurrentJob) => Outcome::Success(GuardJob(None)),
            Err(err) => job_error_outcome(err),
        }
    }
}

fn job_error_outcome(err: JobError) -> Outcome<GuardJob, GuardError> {
    let status = job_error_status(&err);
    Outcome::Error((
        status,
        GuardError {
            status,
            error: anyhow::Error::from(err).context("Failed to resolve job"),
        },
    ))
}
