//! Job dispatch: routes a claimed queue row to its pipeline stage or delivery sink.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use coachdesk_core::domain::job::{
    DocumentPayload, EnquiryPayload, IntakePayload, Job, JobCategory, JobId, JobKind,
    QuotePayload, SendEmailPayload,
};
use coachdesk_core::errors::ApplicationError;

use crate::pipelines::{
    bid_evaluation, intake, job_confirmation, quote_generation, PipelineContext, StageOutcome,
};
use crate::queue::QueueError;

/// Outbound email transport.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_email(&self, email: &SendEmailPayload) -> Result<(), ApplicationError>;
}

/// Destination for generated booking paperwork.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn store(&self, kind: JobKind, document: &DocumentPayload) -> Result<(), ApplicationError>;
}

/// Records the hand-off and drops the message. Used until a mail transport is configured.
#[derive(Clone, Debug, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn send_email(&self, email: &SendEmailPayload) -> Result<(), ApplicationError> {
        info!(
            event_name = "notification.email_handed_off",
            to = %email.to,
            subject = %email.subject,
            html_bytes = email.html.len(),
            "email handed off"
        );
        Ok(())
    }
}

/// Writes each document to `<dir>/<booking_id>-<kind>.txt`.
#[derive(Clone, Debug)]
pub struct FileDocumentSink {
    dir: PathBuf,
}

impl FileDocumentSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: JobKind, document: &DocumentPayload) -> PathBuf {
        self.dir.join(format!("{}-{}.txt", document.booking_id, kind.as_str()))
    }
}

#[async_trait]
impl DocumentSink for FileDocumentSink {
    async fn store(&self, kind: JobKind, document: &DocumentPayload) -> Result<(), ApplicationError> {
        let path = self.path_for(kind, document);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))?;
        tokio::fs::write(&path, document.content.as_bytes())
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))?;
        info!(
            event_name = "document.stored",
            booking_id = %document.booking_id,
            kind = kind.as_str(),
            path = %path.display(),
            "document written"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Stage(StageOutcome),
    Delivered,
}

#[derive(Clone)]
pub struct JobDispatcher {
    ctx: Arc<PipelineContext>,
    notifications: Arc<dyn NotificationSink>,
    documents: Arc<dyn DocumentSink>,
}

impl JobDispatcher {
    pub fn new(
        ctx: Arc<PipelineContext>,
        notifications: Arc<dyn NotificationSink>,
        documents: Arc<dyn DocumentSink>,
    ) -> Self {
        Self { ctx, notifications, documents }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub async fn dispatch(&self, job: &Job) -> Result<Dispatched, ApplicationError> {
        let ctx = self.ctx.as_ref();
        let outcome = match job.kind {
            JobKind::EmailParseOrAnalyze => intake::run(ctx, payload::<IntakePayload>(job)?).await?,
            JobKind::BidEvaluation => {
                bid_evaluation::run(ctx, &payload::<EnquiryPayload>(job)?.enquiry_id).await?
            }
            JobKind::QuoteGeneration => {
                quote_generation::run(ctx, &payload::<EnquiryPayload>(job)?.enquiry_id).await?
            }
            JobKind::JobConfirmation => {
                job_confirmation::run(ctx, &payload::<QuotePayload>(job)?.quote_id).await?
            }
            JobKind::SendEmail => {
                self.notifications.send_email(&payload::<SendEmailPayload>(job)?).await?;
                return Ok(Dispatched::Delivered);
            }
            JobKind::GenerateJobSheet | JobKind::GenerateDriverBriefing => {
                self.documents.store(job.kind, &payload::<DocumentPayload>(job)?).await?;
                return Ok(Dispatched::Delivered);
            }
        };
        Ok(Dispatched::Stage(outcome))
    }

    /// Claims one job of `category`, runs it and writes back the result. `None` when idle.
    pub async fn run_next(
        &self,
        category: JobCategory,
        worker_id: &str,
    ) -> Result<Option<JobId>, QueueError> {
        let Some(job) = self.ctx.queue.claim(category, worker_id).await? else {
            return Ok(None);
        };
        let job_id = job.id.clone();

        match self.dispatch(&job).await {
            Ok(result) => {
                info!(
                    event_name = "runtime.job_completed",
                    job_id = %job_id,
                    kind = job.kind.as_str(),
                    worker_id,
                    result = ?result,
                    "job completed"
                );
                self.ctx.queue.complete(job).await?;
            }
            Err(error) => {
                let failed = self.ctx.queue.fail(job, &error).await?;
                warn!(
                    event_name = "runtime.job_failed",
                    job_id = %job_id,
                    kind = failed.kind.as_str(),
                    worker_id,
                    error_class = error.class(),
                    error = %error,
                    state = failed.state.as_str(),
                    retry_count = failed.retry_count,
                    "job failed"
                );
            }
        }
        Ok(Some(job_id))
    }
}

fn payload<T: serde::de::DeserializeOwned>(job: &Job) -> Result<T, ApplicationError> {
    job.payload_as::<T>().map_err(|error| {
        ApplicationError::InvalidPayload(format!("{} payload: {error}", job.kind.as_str()))
    })
}
