//! Pipeline orchestrators.
//!
//! Each stage checks the enquiry's pre-state, asks the executor for its decisions and either
//! commits them (advancing status with a compare-and-set write) or opens a review task and
//! stops. Stages are safe to re-deliver: a stage that finds its record elsewhere returns
//! [`StageOutcome::Skipped`].

pub mod bid_evaluation;
pub mod bids;
pub mod intake;
pub mod job_confirmation;
pub mod quote_generation;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use coachdesk_core::config::{AppConfig, PipelineConfig};
use coachdesk_core::domain::decision::{
    DecisionLogId, DecisionTargets, DecisionType, PipelineRunId,
};
use coachdesk_core::domain::enquiry::{EnquiryId, EnquiryStatus};
use coachdesk_core::domain::job::{JobId, NewJob};
use coachdesk_core::domain::reference::ReferencePrefix;
use coachdesk_core::domain::review::{HumanReviewTask, ReviewReason, ReviewTarget, ReviewTaskId};
use coachdesk_core::errors::{ApplicationError, DomainError};
use coachdesk_core::jobs::{JobEngineConfig, JobStateEngine};
use coachdesk_core::outputs::{DecisionOutput, PersonalizedEmail};
use coachdesk_core::pricing::MarkupBounds;
use coachdesk_db::repositories::{Repositories, RepositoryError};

use crate::confidence::ConfidenceEvaluator;
use crate::cost::CostTracker;
use crate::executor::{
    DecisionOutcome, DecisionRequest, ExecutorError, RetryPolicy, TaskExecutor, TaskFailed,
};
use crate::guardrails::GuardrailPolicy;
use crate::llm::InferenceProvider;
use crate::prompts::{PromptError, PromptLibrary};
use crate::queue::{JobQueue, QueueError};

pub const MARKUP_MIN_SETTING_KEY: &str = "markup.min_percent";
pub const MARKUP_MAX_SETTING_KEY: &str = "markup.max_percent";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Advanced { enquiry_id: EnquiryId, status: EnquiryStatus },
    Escalated { review_task_id: ReviewTaskId, reason: ReviewReason },
    NoBids { enquiry_id: EnquiryId },
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("{record} not found: {id}")]
    NotFound { record: &'static str, id: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub(crate) fn not_found(record: &'static str, id: impl ToString) -> Self {
        Self::NotFound { record, id: id.to_string() }
    }
}

impl From<PipelineError> for ApplicationError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Storage(error) => Self::Persistence(error.to_string()),
            PipelineError::Queue(error) => Self::Persistence(error.to_string()),
            PipelineError::Domain(error) => Self::Domain(error),
            PipelineError::Prompt(error) => Self::Configuration(error.to_string()),
            error @ (PipelineError::NotFound { .. } | PipelineError::InvalidInput(_)) => {
                Self::InvalidPayload(error.to_string())
            }
        }
    }
}

/// Result of one AI decision as seen by a stage.
pub(crate) enum Decided<T> {
    Made(DecisionOutcome<T>),
    Failed(TaskFailed),
}

/// Lets a stage helper either hand back a value or end the stage early.
pub(crate) enum Step<T> {
    Continue(T),
    Stop(StageOutcome),
}

/// Everything a stage needs. Cheap to share behind an `Arc` across worker tasks.
pub struct PipelineContext {
    pub repos: Repositories,
    pub executor: Arc<TaskExecutor>,
    pub confidence: Arc<ConfidenceEvaluator>,
    pub costs: Arc<CostTracker>,
    pub queue: JobQueue,
    pub prompts: Arc<PromptLibrary>,
    pub settings: PipelineConfig,
    pub guardrails: GuardrailPolicy,
}

impl PipelineContext {
    pub fn new(
        repos: Repositories,
        provider: Arc<dyn InferenceProvider>,
        config: &AppConfig,
    ) -> Result<Self, PromptError> {
        Self::with_retry_policy(repos, provider, config, RetryPolicy::from_config(&config.llm))
    }

    pub fn with_retry_policy(
        repos: Repositories,
        provider: Arc<dyn InferenceProvider>,
        config: &AppConfig,
        retry: RetryPolicy,
    ) -> Result<Self, PromptError> {
        let confidence = Arc::new(ConfidenceEvaluator::new(repos.settings.clone()));
        let costs =
            Arc::new(CostTracker::new(repos.costs.clone(), repos.settings.clone(), &config.budget));
        let executor = Arc::new(TaskExecutor::new(
            provider,
            confidence.clone(),
            repos.decisions.clone(),
            costs.clone(),
            retry,
        ));
        let engine = JobStateEngine::with_config(JobEngineConfig {
            default_max_retries: config.workers.queue_max_retries,
            retry_base_delay_seconds: i64::try_from(config.workers.queue_backoff_base_secs)
                .unwrap_or(i64::MAX),
            ..JobEngineConfig::default()
        });

        Ok(Self {
            queue: JobQueue::with_engine(repos.jobs.clone(), engine),
            repos,
            executor,
            confidence,
            costs,
            prompts: Arc::new(PromptLibrary::new()?),
            settings: config.pipeline.clone(),
            guardrails: GuardrailPolicy::default(),
        })
    }

    pub(crate) async fn decide<T: DecisionOutput>(
        &self,
        context: &impl Serialize,
        targets: DecisionTargets,
        run: &PipelineRunId,
    ) -> Result<Decided<T>, PipelineError> {
        let messages = self.prompts.messages(T::DECISION_TYPE, context)?;
        let request = DecisionRequest::<T>::for_output(messages, targets, run.clone());
        match self.executor.execute(request).await {
            Ok(outcome) => Ok(Decided::Made(outcome)),
            Err(ExecutorError::Failed(failure)) => Ok(Decided::Failed(failure)),
            Err(ExecutorError::Storage(error)) => Err(error.into()),
        }
    }

    /// Email personalization is committed regardless of confidence; only a failed call stops the stage.
    pub(crate) async fn personalize(
        &self,
        email: &EmailBrief,
        targets: DecisionTargets,
        target: &ReviewTarget,
        run: &PipelineRunId,
    ) -> Result<Step<PersonalizedEmail>, PipelineError> {
        match self.decide::<PersonalizedEmail>(email, targets, run).await? {
            Decided::Made(outcome) => Ok(Step::Continue(outcome.output)),
            Decided::Failed(failure) => {
                Ok(Step::Stop(self.escalate_failure(failure, target.clone()).await?))
            }
        }
    }

    pub(crate) async fn escalate(
        &self,
        decision_type: DecisionType,
        target: ReviewTarget,
        decision_log_id: Option<DecisionLogId>,
        reason: ReviewReason,
        context: Value,
    ) -> Result<StageOutcome, PipelineError> {
        let task = HumanReviewTask::open(decision_type, target, decision_log_id, reason, context);
        let review_task_id = task.id.clone();
        info!(
            event_name = "pipeline.escalated",
            review_task_id = %review_task_id,
            decision_type = decision_type.as_str(),
            reason = reason.as_str(),
            target_kind = task.target.kind.as_str(),
            target_id = %task.target.id,
            "decision handed to human review"
        );
        self.repos.reviews.save(task).await?;
        Ok(StageOutcome::Escalated { review_task_id, reason })
    }

    pub(crate) async fn escalate_failure(
        &self,
        failure: TaskFailed,
        target: ReviewTarget,
    ) -> Result<StageOutcome, PipelineError> {
        let context = json!({ "reason": failure.reason, "attempts": failure.attempts });
        self.escalate(failure.decision_type, target, failure.log_id, ReviewReason::AiFailure, context)
            .await
    }

    pub(crate) async fn next_reference(
        &self,
        prefix: ReferencePrefix,
        at: DateTime<Utc>,
    ) -> Result<String, PipelineError> {
        let year = at.year();
        let value = self.repos.sequences.next_value(&prefix.sequence_name(year)).await?;
        Ok(prefix.format(year, value))
    }

    pub(crate) async fn enqueue(&self, job: NewJob) -> Result<Option<JobId>, PipelineError> {
        Ok(self.queue.enqueue(job).await?)
    }

    /// Queues bid evaluation once the enquiry is out to suppliers with no invitation pending.
    /// Returns whether a new job was queued.
    pub(crate) async fn queue_bid_evaluation(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<bool, PipelineError> {
        if self.repos.invitations.count_pending(enquiry_id).await? > 0 {
            return Ok(false);
        }
        let status = self.repos.enquiries.find_by_id(enquiry_id).await?.map(|enquiry| enquiry.status);
        if status != Some(EnquiryStatus::SentToSuppliers) {
            debug!(
                event_name = "pipeline.bid_evaluation_held",
                enquiry_id = %enquiry_id,
                status = status.map(|status| status.as_str()).unwrap_or("missing"),
                "bids complete but enquiry is not out to suppliers"
            );
            return Ok(false);
        }
        Ok(self.enqueue(NewJob::bid_evaluation(enquiry_id.clone())).await?.is_some())
    }

    /// Settings override the configured bounds; unreadable values fall back to config.
    pub async fn markup_bounds(&self) -> MarkupBounds {
        let min = self.decimal_setting(MARKUP_MIN_SETTING_KEY).await;
        let max = self.decimal_setting(MARKUP_MAX_SETTING_KEY).await;
        MarkupBounds::new(
            min.unwrap_or(self.settings.markup_min_percent),
            max.unwrap_or(self.settings.markup_max_percent),
        )
    }

    async fn decimal_setting(&self, key: &str) -> Option<Decimal> {
        let value = self.repos.settings.get(key).await.ok().flatten()?;
        Decimal::from_str(value.trim()).ok()
    }

    pub(crate) fn portal_link(&self, path: &str) -> String {
        format!("{}/{}", self.settings.portal_base_url.trim_end_matches('/'), path)
    }
}

/// Prompt context for an email personalization decision.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct EmailBrief {
    pub purpose: &'static str,
    pub recipient_name: String,
    pub recipient_email: String,
    pub facts: Vec<EmailFact>,
    pub link: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct EmailFact {
    pub label: &'static str,
    pub value: String,
}

pub(crate) fn fact(label: &'static str, value: impl Into<String>) -> EmailFact {
    EmailFact { label, value: value.into() }
}

pub(crate) fn format_date(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string()).unwrap_or_else(|| "not given".to_string())
}
