//! In-memory registry of processing jobs.
//!
//! Every upload creates a job with its own working directories, so a new
//! upload never touches the files of a job that is still being processed.
//! Status transitions happen under the job's map entry lock.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::workflow::processors::script::ScriptOutcome;
use crate::workflow::types::{JobDirs, JobStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    #[serde(skip)]
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Number of files accepted at upload time; the progress baseline.
    pub n_files: usize,
    pub error: Option<String>,
    /// Outcomes of the most recent processing run.
    pub steps: Vec<ScriptOutcome>,
    #[serde(skip)]
    pub dirs: JobDirs,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("No job has been created yet")]
    NoCurrentJob,
    #[error("Job {0} does not exist")]
    NotFound(Uuid),
    #[error("Invalid job id: {0}")]
    InvalidId(String),
    #[error("Job {0} is already being processed")]
    Running(Uuid),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct JobRegistry {
    jobs_root: PathBuf,
    max_retained: usize,
    next_seq: AtomicU64,
    jobs: DashMap<Uuid, JobRecord>,
    current: RwLock<Option<Uuid>>,
}

impl JobRegistry {
    pub fn new(jobs_root: impl Into<PathBuf>, max_retained: usize) -> Self {
        Self {
            jobs_root: jobs_root.into(),
            max_retained: max_retained.max(1),
            next_seq: AtomicU64::new(0),
            jobs: DashMap::new(),
            current: RwLock::new(None),
        }
    }

    /// Creates a job with fresh, empty working directories and makes it current.
    pub fn create(&self) -> Result<JobRecord> {
        let id = Uuid::new_v4();
        let dirs = JobDirs::new(self.jobs_root.join(id.to_string()));
        dirs.clear_all()?;

        let record = JobRecord {
            id,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
            status: JobStatus::Pending,
            n_files: 0,
            error: None,
            steps: Vec::new(),
            dirs,
        };
        self.jobs.insert(id, record.clone());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
        info!("Created job {}", id);

        self.prune();
        Ok(record)
    }

    pub fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    pub fn current_id(&self) -> Option<Uuid> {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `id`, or the current job when no id is given.
    pub fn resolve(&self, id: Option<Uuid>) -> Result<JobRecord, JobError> {
        let id = match id {
            Some(id) => id,
            None => self.current_id().ok_or(JobError::NoCurrentJob)?,
        };
        self.get(&id).ok_or(JobError::NotFound(id))
    }

    /// Newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> =
            self.jobs.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));
        records
    }

    pub fn set_baseline(&self, id: &Uuid, n_files: usize) -> Result<(), JobError> {
        let mut entry = self.jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        entry.n_files = n_files;
        Ok(())
    }

    /// Moves the job to `running`. Fails when it is already running.
    pub fn begin_run(&self, id: &Uuid) -> Result<RunGuard<'_>, JobError> {
        let mut entry = self.jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        if entry.status == JobStatus::Running {
            return Err(JobError::Running(*id));
        }
        entry.status = JobStatus::Running;
        entry.error = None;
        entry.steps.clear();
        Ok(RunGuard {
            registry: self,
            id: *id,
            finished: false,
        })
    }

    /// Empties every working directory of the job and drops its progress baseline.
    ///
    /// The job counts as `running` while its directories are deleted, so no
    /// processing run can start on it meanwhile. The entry lock is not held
    /// during the delete.
    pub fn reset(&self, id: &Uuid) -> Result<JobRecord, JobError> {
        let dirs = {
            let mut entry = self.jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
            if entry.status == JobStatus::Running {
                return Err(JobError::Running(*id));
            }
            entry.status = JobStatus::Running;
            entry.n_files = 0;
            entry.error = None;
            entry.steps.clear();
            entry.dirs.clone()
        };

        let cleared = dirs.clear_all();

        let mut entry = self.jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        match cleared {
            Ok(()) => {
                entry.status = JobStatus::Pending;
                info!("Reset job {}", id);
                Ok(entry.value().clone())
            }
            Err(err) => {
                entry.status = JobStatus::Failed;
                entry.error = Some(format!("Failed to reset job directories: {:#}", err));
                Err(JobError::Storage(err))
            }
        }
    }

    fn finish(&self, id: &Uuid, steps: Vec<ScriptOutcome>, error: Option<String>) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.status = if error.is_some() {
                JobStatus::Failed
            } else {
                JobStatus::Done
            };
            entry.error = error;
            entry.steps = steps;
        }
    }

    /// Drops the oldest jobs beyond the retention limit, skipping the current
    /// job and jobs that are running.
    fn prune(&self) {
        let current = self.current_id();
        let records = self.list();
        let mut retained = records.len();
        for record in records.iter().rev() {
            if retained <= self.max_retained {
                break;
            }
            if Some(record.id) == current {
                continue;
            }
            let removed = self
                .jobs
                .remove_if(&record.id, |_, r| r.status != JobStatus::Running);
            if let Some((id, removed)) = removed {
                retained -= 1;
                if let Err(err) = std::fs::remove_dir_all(&removed.dirs.root) {
                    warn!("Failed to remove directories of pruned job {}: {}", id, err);
                } else {
                    info!("Pruned job {}", id);
                }
            }
        }
    }
}

/// Held while a job runs. Dropping it without [`RunGuard::finish`] (for
/// example when the request is cancelled) marks the job failed.
pub struct RunGuard<'a> {
    registry: &'a JobRegistry,
    id: Uuid,
    finished: bool,
}

impl RunGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn finish(mut self, steps: Vec<ScriptOutcome>, error: Option<String>) {
        self.registry.finish(&self.id, steps, error);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Processing of job {} was interrupted", self.id);
            self.registry.finish(
                &self.id,
                Vec::new(),
                Some("Processing was interrupted".to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(root: &tempfile::TempDir, max_retained: usize) -> JobRegistry {
        JobRegistry::new(root.path().join("jobs"), max_retained)
    }

    #[test]
    fn create_makes_empty_dirs_and_becomes_current() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);

        let first = jobs.create().unwrap();
        let second = jobs.create().unwrap();

        assert!(second.dirs.upload.is_dir());
        assert!(second.dirs.detect.is_dir());
        assert!(second.dirs.tagged.is_dir());
        assert_eq!(jobs.current_id(), Some(second.id));
        assert_eq!(jobs.resolve(None).unwrap().id, second.id);
        assert_eq!(jobs.resolve(Some(first.id)).unwrap().status, JobStatus::Pending);
        assert_ne!(first.dirs.root, second.dirs.root);
    }

    #[test]
    fn resolve_reports_missing_jobs() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        assert!(matches!(jobs.resolve(None), Err(JobError::NoCurrentJob)));
        let id = Uuid::new_v4();
        assert!(matches!(jobs.resolve(Some(id)), Err(JobError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn second_run_is_rejected_while_running() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        let job = jobs.create().unwrap();

        let guard = jobs.begin_run(&job.id).unwrap();
        assert!(matches!(jobs.begin_run(&job.id), Err(JobError::Running(_))));
        assert!(matches!(jobs.reset(&job.id), Err(JobError::Running(_))));

        guard.finish(Vec::new(), None);
        assert_eq!(jobs.get(&job.id).unwrap().status, JobStatus::Done);
        assert!(jobs.begin_run(&job.id).is_ok());
    }

    #[test]
    fn dropped_guard_marks_job_failed() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        let job = jobs.create().unwrap();

        drop(jobs.begin_run(&job.id).unwrap());

        let record = jobs.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Processing was interrupted"));
    }

    #[test]
    fn reset_clears_dirs_and_baseline() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        let job = jobs.create().unwrap();
        std::fs::write(job.dirs.upload.join("a.jpg"), b"a").unwrap();
        std::fs::create_dir_all(job.dirs.tagged.join("fox")).unwrap();
        jobs.set_baseline(&job.id, 1).unwrap();
        jobs.begin_run(&job.id).unwrap().finish(Vec::new(), Some("boom".into()));

        let record = jobs.reset(&job.id).unwrap();

        assert_eq!(record.n_files, 0);
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.error, None);
        for dir in [&job.dirs.upload, &job.dirs.detect, &job.dirs.tagged] {
            assert!(std::fs::read_dir(dir).unwrap().next().is_none());
        }
    }

    #[test]
    fn lookups_proceed_while_reset_deletes_files() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        let job = jobs.create().unwrap();
        for i in 0..2000 {
            let dir = job.dirs.tagged.join(format!("cat{}", i % 20));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.jpg", i)), b"x").unwrap();
        }

        let statuses = std::thread::scope(|scope| {
            let resetting = scope.spawn(|| jobs.reset(&job.id));
            let mut statuses = Vec::new();
            while !resetting.is_finished() {
                statuses.push(jobs.resolve(Some(job.id)).unwrap().status);
            }
            resetting.join().unwrap().unwrap();
            statuses
        });

        // Every lookup during the delete saw the job as busy or already reset.
        assert!(statuses
            .iter()
            .all(|status| matches!(status, JobStatus::Running | JobStatus::Pending)));
        assert_eq!(jobs.get(&job.id).unwrap().status, JobStatus::Pending);
        assert!(matches!(jobs.begin_run(&job.id), Ok(_)));
    }

    #[test]
    fn reset_is_rejected_while_running() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 4);
        let job = jobs.create().unwrap();
        let _running = jobs.begin_run(&job.id).unwrap();
        assert!(matches!(jobs.reset(&job.id), Err(JobError::Running(_))));
    }

    #[test]
    fn prune_keeps_running_and_newest_jobs() {
        let root = tempfile::tempdir().unwrap();
        let jobs = registry(&root, 2);
        let oldest = jobs.create().unwrap();
        let _running = jobs.begin_run(&oldest.id).unwrap();
        let middle = jobs.create().unwrap();
        let newest = jobs.create().unwrap();

        assert!(jobs.get(&oldest.id).is_some());
        assert!(jobs.get(&middle.id).is_none());
        assert!(!middle.dirs.root.exists());
        assert!(jobs.get(&newest.id).is_some());
        assert_eq!(
            jobs.list().iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![newest.id, oldest.id]
        );
    }
}
