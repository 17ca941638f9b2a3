use rocket::Request;
use uuid::Uuid;

use crate::workflow::jobs::JobError;

/// Reads the `job` query parameter. `Ok(None)` when the request names no job.
pub fn extract_job_id(req: &Request<'_>) -> Result<Option<Uuid>, JobError> {
    match req.query_value::<&str>("job") {
        None => Ok(None),
        Some(Ok(raw)) => Uuid::parse_str(raw.trim())
            .map(Some)
            .map_err(|_| JobError::InvalidId(raw.to_string())),
        Some(Err(_)) => Err(JobError::InvalidId("<undecodable>".to_string())),
    }
}
