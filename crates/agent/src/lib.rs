//! Decision runtime for the coach booking pipeline.
//!
//! Every AI call goes through [`executor::TaskExecutor`]: schema-checked output, retry with
//! backoff, a confidence gate, one decision log entry per call and a cost record. The
//! orchestrators in [`pipelines`] chain those decisions into the four stages of a booking
//! (intake, bid evaluation, quote generation, job confirmation) and hand anything they
//! cannot commit to a human review task.
//!
//! Prices are never taken from a model verbatim. Markup is clamped to configured bounds
//! and the quote arithmetic is done in `coachdesk_core::pricing`.

pub mod confidence;
pub mod cost;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod pipelines;
pub mod prompts;
pub mod queue;
pub mod reviews;
pub mod runtime;
pub mod scheduler;

pub use confidence::ConfidenceEvaluator;
pub use cost::{CostTracker, SpendReport};
pub use executor::{DecisionOutcome, DecisionRequest, ExecutorError, RetryPolicy, TaskExecutor, TaskFailed};
pub use guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
pub use llm::{provider_from_config, InferenceProvider, ProviderError, ScriptedProvider};
pub use pipelines::{PipelineContext, PipelineError, StageOutcome};
pub use prompts::{PromptError, PromptLibrary};
pub use queue::{JobQueue, QueueError};
pub use reviews::{ReviewDesk, ReviewError};
pub use runtime::{
    DocumentSink, FileDocumentSink, JobDispatcher, LoggingNotificationSink, NotificationSink,
};
pub use scheduler::{Scheduler, SweepKind, SweepReport};
