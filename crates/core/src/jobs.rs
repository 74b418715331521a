//! Durable job queue state machine
//!
//! Pure transition rules for queue rows. Storage backends claim rows atomically and then
//! use this engine to compute the completed or failed row they write back.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::job::{Job, JobId, JobState, NewJob};

#[derive(Clone, Debug)]
pub struct JobEngineConfig {
    /// How long before a claimed job is considered abandoned
    pub claim_timeout_seconds: i64,
    pub default_max_retries: u32,
    pub retry_backoff_multiplier: u32,
    pub retry_base_delay_seconds: i64,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 300,
            default_max_retries: 5,
            retry_backoff_multiplier: 2,
            retry_base_delay_seconds: 5,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid job transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: JobState, to: JobState, reason: String },
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("claim conflict: job {0} already claimed by {1}")]
    ClaimConflict(JobId, String),
    #[error("job not yet available: {0}")]
    NotYetAvailable(JobId),
}

/// How a failed job should be treated by the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobFailurePolicy {
    /// Re-deliver later with exponential backoff while retries remain
    Retry,
    FailTerminal,
}

#[derive(Clone, Debug, Default)]
pub struct JobStateEngine {
    config: JobEngineConfig,
}

impl JobStateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JobEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JobEngineConfig {
        &self.config
    }

    pub fn create_job(&self, request: NewJob) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::generate(),
            category: request.kind.category(),
            kind: request.kind,
            payload: request.payload,
            dedupe_key: request.dedupe_key,
            state: JobState::Queued,
            retry_count: 0,
            max_retries: self.config.default_max_retries,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Queued|RetryableFailed -> Running. A running job may be stolen once its claim is stale.
    pub fn claim_job(
        &self,
        mut job: Job,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        match job.state {
            JobState::Queued | JobState::RetryableFailed => {}
            JobState::Running => {
                if let Some(claimed_at) = job.claimed_at {
                    let stale_threshold =
                        claimed_at + Duration::seconds(self.config.claim_timeout_seconds);
                    if now < stale_threshold {
                        return Err(JobError::ClaimConflict(
                            job.id.clone(),
                            job.claimed_by.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
            JobState::Completed | JobState::FailedTerminal => {
                return Err(JobError::InvalidTransition {
                    from: job.state,
                    to: JobState::Running,
                    reason: "job already in terminal state".to_string(),
                });
            }
        }

        if now < job.available_at {
            return Err(JobError::NotYetAvailable(job.id.clone()));
        }

        job.state = JobState::Running;
        job.claimed_by = Some(worker_id.into());
        job.claimed_at = Some(now);
        job.updated_at = now;
        Ok(job)
    }

    pub fn complete_job(&self, mut job: Job) -> Result<Job, JobError> {
        self.validate_transition(&job, JobState::Completed)?;

        job.state = JobState::Completed;
        job.updated_at = Utc::now();
        job.claimed_by = None;
        job.claimed_at = None;
        Ok(job)
    }

    pub fn fail_job(
        &self,
        mut job: Job,
        error: impl Into<String>,
        policy: JobFailurePolicy,
    ) -> Result<Job, JobError> {
        self.validate_transition(&job, JobState::RetryableFailed)?;

        let now = Utc::now();
        let should_retry =
            matches!(policy, JobFailurePolicy::Retry) && job.retry_count < job.max_retries;

        if should_retry {
            job.available_at = now + self.backoff_for(job.retry_count);
            job.state = JobState::RetryableFailed;
            job.retry_count += 1;
        } else {
            job.state = JobState::FailedTerminal;
        }

        job.last_error = Some(error.into());
        job.updated_at = now;
        job.claimed_by = None;
        job.claimed_at = None;
        Ok(job)
    }

    /// `base * multiplier^retry_count`, saturating instead of overflowing.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = self.config.retry_backoff_multiplier.saturating_pow(retry_count);
        Duration::seconds(self.config.retry_base_delay_seconds.saturating_mul(i64::from(factor)))
    }

    /// Running jobs whose claim outlived the timeout.
    pub fn stale_jobs(&self, jobs: Vec<Job>, reference_time: DateTime<Utc>) -> Vec<Job> {
        let stale_threshold = reference_time - Duration::seconds(self.config.claim_timeout_seconds);

        jobs.into_iter()
            .filter(|job| {
                job.state == JobState::Running
                    && job.claimed_at.is_some_and(|claimed_at| claimed_at < stale_threshold)
            })
            .collect()
    }

    fn validate_transition(&self, job: &Job, to_state: JobState) -> Result<(), JobError> {
        let valid = match (job.state, to_state) {
            (JobState::Running, JobState::Completed)
            | (JobState::Running, JobState::RetryableFailed)
            | (JobState::Running, JobState::FailedTerminal) => true,
            (JobState::Queued, JobState::Running) | (JobState::RetryableFailed, JobState::Running) => {
                true
            }
            (from, to) if from == to => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: job.state,
                to: to_state,
                reason: format!("cannot transition from {:?} to {:?}", job.state, to_state),
            })
        }
    }
}
