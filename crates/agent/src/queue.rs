use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use coachdesk_core::domain::job::{Job, JobCategory, JobId, NewJob};
use coachdesk_core::errors::ApplicationError;
use coachdesk_core::jobs::{JobError, JobFailurePolicy, JobStateEngine};
use coachdesk_db::repositories::{JobQueueRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Durable queue facade: row transitions come from the job engine, storage from the repository.
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobQueueRepository>,
    engine: JobStateEngine,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobQueueRepository>) -> Self {
        Self::with_engine(jobs, JobStateEngine::new())
    }

    pub fn with_engine(jobs: Arc<dyn JobQueueRepository>, engine: JobStateEngine) -> Self {
        Self { jobs, engine }
    }

    /// Returns `None` when the dedupe key is already taken.
    pub async fn enqueue(&self, request: NewJob) -> Result<Option<JobId>, QueueError> {
        let job = self.engine.create_job(request);
        let id = job.id.clone();
        let kind = job.kind;
        let dedupe_key = job.dedupe_key.clone();

        if self.jobs.enqueue(job).await? {
            debug!(event_name = "queue.enqueued", job_id = %id, kind = kind.as_str(), "job enqueued");
            Ok(Some(id))
        } else {
            debug!(
                event_name = "queue.deduplicated",
                kind = kind.as_str(),
                dedupe_key = dedupe_key.as_deref().unwrap_or_default(),
                "job already queued under this key"
            );
            Ok(None)
        }
    }

    pub async fn claim(&self, category: JobCategory, worker_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.claim_next(category, worker_id, Utc::now()).await?)
    }

    pub async fn complete(&self, job: Job) -> Result<(), QueueError> {
        let job = self.engine.complete_job(job)?;
        self.jobs.save(job).await?;
        Ok(())
    }

    /// Retryable errors go back to the pool with backoff; everything else fails terminally.
    pub async fn fail(&self, job: Job, error: &ApplicationError) -> Result<Job, QueueError> {
        let policy =
            if error.is_retryable() { JobFailurePolicy::Retry } else { JobFailurePolicy::FailTerminal };
        let job = self.engine.fail_job(job, error.to_string(), policy)?;
        self.jobs.save(job.clone()).await?;
        Ok(job)
    }

    /// Hands running jobs whose claim outlived the timeout back to the pool.
    pub async fn release_stale(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let cutoff = now - Duration::seconds(self.engine.config().claim_timeout_seconds);
        let released = self.jobs.release_stale(cutoff).await?;
        if released > 0 {
            warn!(event_name = "queue.stale_released", released, "released abandoned job claims");
        }
        Ok(released)
    }
}
