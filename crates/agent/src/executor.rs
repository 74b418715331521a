//! Single-decision executor.
//!
//! Runs one AI decision end to end: provider call with bounded retries, confidence gate,
//! decision log entry, cost record. It never touches business records; committing (or not)
//! the returned output is the calling pipeline's job.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use coachdesk_core::config::LlmConfig;
use coachdesk_core::domain::decision::{
    DecisionAction, DecisionLogEntry, DecisionLogId, DecisionTargets, DecisionType, PipelineRunId,
    TokenUsage,
};
use coachdesk_core::outputs::DecisionOutput;
use coachdesk_core::thresholds::{extract_confidence, ConfidenceVerdict};
use coachdesk_db::repositories::{DecisionLogRepository, RepositoryError};

use crate::confidence::ConfidenceEvaluator;
use crate::cost::{CostInput, CostTracker};
use crate::llm::{ChatMessage, InferenceProvider, StructuredCompletion};

pub const BUDGET_EXCEEDED_REASON: &str = "daily budget exceeded";

/// Linear backoff: the wait after failed attempt `n` (1-based) is `n * base_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_base_delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(1000))
    }
}

/// Transient description of one decision. Build it with [`DecisionRequest::for_output`] so
/// the decision type and schema always match the output type decoded by the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionRequest<T> {
    pub decision_type: DecisionType,
    pub messages: Vec<ChatMessage>,
    pub targets: DecisionTargets,
    pub schema: Value,
    pub pipeline_run_id: PipelineRunId,
    pub model: Option<String>,
    output: PhantomData<fn() -> T>,
}

impl<T: DecisionOutput> DecisionRequest<T> {
    pub fn for_output(
        messages: Vec<ChatMessage>,
        targets: DecisionTargets,
        pipeline_run_id: PipelineRunId,
    ) -> Self {
        Self {
            decision_type: T::DECISION_TYPE,
            messages,
            targets,
            schema: T::output_schema(),
            pipeline_run_id,
            model: None,
            output: PhantomData,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionOutcome<T> {
    pub output: T,
    pub raw: Value,
    pub confidence: f64,
    pub verdict: ConfidenceVerdict,
    pub auto_executed: bool,
    pub log_id: DecisionLogId,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub model: String,
    pub cost: Decimal,
}

/// Every attempt failed (or the budget guard refused the call). A terminal
/// `ESCALATED_TO_HUMAN` entry has been written unless `log_id` is `None`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{decision_type} failed after {attempts} attempt(s): {reason}")]
pub struct TaskFailed {
    pub decision_type: DecisionType,
    pub attempts: u32,
    pub reason: String,
    pub log_id: Option<DecisionLogId>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Failed(#[from] TaskFailed),
    #[error("decision bookkeeping failed: {0}")]
    Storage(#[from] RepositoryError),
}

pub struct TaskExecutor {
    provider: Arc<dyn InferenceProvider>,
    confidence: Arc<ConfidenceEvaluator>,
    decisions: Arc<dyn DecisionLogRepository>,
    costs: Arc<CostTracker>,
    retry: RetryPolicy,
}

impl TaskExecutor {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        confidence: Arc<ConfidenceEvaluator>,
        decisions: Arc<dyn DecisionLogRepository>,
        costs: Arc<CostTracker>,
        retry: RetryPolicy,
    ) -> Self {
        Self { provider, confidence, decisions, costs, retry }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn execute<T: DecisionOutput>(
        &self,
        request: DecisionRequest<T>,
    ) -> Result<DecisionOutcome<T>, ExecutorError> {
        let model =
            request.model.clone().unwrap_or_else(|| self.provider.default_model().to_string());

        if self.budget_blocks().await {
            return Err(self.fail_terminal(&request, &model, 0, BUDGET_EXCEEDED_REASON).await);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts() {
            match self.attempt::<T>(&request, &model).await {
                Ok((completion, output)) => {
                    return self.commit(&request, completion, output).await;
                }
                Err(reason) => {
                    warn!(
                        event_name = "executor.attempt_failed",
                        decision_type = %request.decision_type,
                        pipeline_run_id = %request.pipeline_run_id,
                        attempt,
                        error = %reason,
                        "decision attempt failed"
                    );
                    last_error = reason;
                }
            }

            if attempt < self.retry.max_attempts() {
                let delay = self.retry.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(self.fail_terminal(&request, &model, self.retry.max_attempts(), &last_error).await)
    }

    async fn attempt<T: DecisionOutput>(
        &self,
        request: &DecisionRequest<T>,
        model: &str,
    ) -> Result<(StructuredCompletion, T), String> {
        let completion = self
            .provider
            .structured_completion(model, &request.messages, &request.schema)
            .await
            .map_err(|error| error.to_string())?;
        let output = serde_json::from_value::<T>(completion.parsed.clone())
            .map_err(|error| format!("typed decode failed: {error}"))?;
        Ok((completion, output))
    }

    async fn commit<T: DecisionOutput>(
        &self,
        request: &DecisionRequest<T>,
        completion: StructuredCompletion,
        output: T,
    ) -> Result<DecisionOutcome<T>, ExecutorError> {
        let confidence = extract_confidence(&completion.parsed);
        let verdict = self.confidence.evaluate(request.decision_type, confidence).await;
        let (action, escalation_reason) = verdict.log_disposition(request.decision_type);
        let cost = self.costs.cost_of(&completion.model, completion.usage);
        let now = Utc::now();

        let entry = DecisionLogEntry {
            id: DecisionLogId::generate(),
            decision_type: request.decision_type,
            pipeline_run_id: request.pipeline_run_id.clone(),
            provider: self.provider.name().to_string(),
            model: completion.model.clone(),
            prompt: prompt_payload(&request.messages),
            raw_response: Some(completion.parsed.clone()),
            parsed_output: Some(output.clone().into_payload()),
            confidence_score: verdict.confidence,
            action,
            escalation_reason,
            usage: completion.usage,
            latency_ms: completion.latency_ms,
            estimated_cost: cost,
            targets: request.targets.clone(),
            overrides_entry_id: None,
            created_at: now,
        };
        let log_id = self.decisions.append(entry).await?;

        self.costs
            .record(CostInput {
                decision_type: request.decision_type,
                provider: self.provider.name().to_string(),
                model: completion.model.clone(),
                usage: completion.usage,
                decision_log_id: Some(log_id.clone()),
                at: now,
            })
            .await?;

        info!(
            event_name = "executor.decision_completed",
            decision_type = %request.decision_type,
            pipeline_run_id = %request.pipeline_run_id,
            decision_log_id = %log_id,
            confidence = verdict.confidence,
            threshold = verdict.threshold,
            auto_executed = verdict.auto_executed,
            latency_ms = completion.latency_ms,
            "decision completed"
        );

        Ok(DecisionOutcome {
            output,
            raw: completion.parsed,
            confidence: verdict.confidence,
            verdict,
            auto_executed: verdict.auto_executed,
            log_id,
            usage: completion.usage,
            latency_ms: completion.latency_ms,
            model: completion.model,
            cost,
        })
    }

    async fn budget_blocks(&self) -> bool {
        let today = Utc::now().date_naive();
        match self.costs.status(self.provider.name(), today).await {
            Ok(status) => status.blocks_calls(self.costs.mode()),
            Err(error) => {
                warn!(
                    event_name = "executor.budget_check_failed",
                    error = %error,
                    "budget status unavailable, allowing call"
                );
                false
            }
        }
    }

    /// Writes the single terminal entry for a decision that produced no usable output.
    async fn fail_terminal<T>(
        &self,
        request: &DecisionRequest<T>,
        model: &str,
        attempts: u32,
        reason: &str,
    ) -> ExecutorError {
        let entry = DecisionLogEntry {
            id: DecisionLogId::generate(),
            decision_type: request.decision_type,
            pipeline_run_id: request.pipeline_run_id.clone(),
            provider: self.provider.name().to_string(),
            model: model.to_string(),
            prompt: prompt_payload(&request.messages),
            raw_response: None,
            parsed_output: None,
            confidence_score: 0.0,
            action: DecisionAction::EscalatedToHuman,
            escalation_reason: Some(reason.to_string()),
            usage: TokenUsage::default(),
            latency_ms: 0,
            estimated_cost: Decimal::ZERO,
            targets: request.targets.clone(),
            overrides_entry_id: None,
            created_at: Utc::now(),
        };

        let log_id = match self.decisions.append(entry).await {
            Ok(id) => Some(id),
            Err(storage) => {
                error!(
                    event_name = "executor.terminal_log_failed",
                    decision_type = %request.decision_type,
                    error = %storage,
                    "could not record failed decision"
                );
                None
            }
        };

        error!(
            event_name = "executor.task_failed",
            decision_type = %request.decision_type,
            pipeline_run_id = %request.pipeline_run_id,
            attempts,
            reason,
            "decision failed"
        );

        ExecutorError::Failed(TaskFailed {
            decision_type: request.decision_type,
            attempts,
            reason: reason.to_string(),
            log_id,
        })
    }
}

fn prompt_payload(messages: &[ChatMessage]) -> Value {
    serde_json::to_value(messages).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use serde_json::json;

    use coachdesk_core::config::BudgetConfig;
    use coachdesk_core::cost::BudgetMode;
    use coachdesk_core::domain::decision::{
        DecisionAction, DecisionTargets, PipelineRunId, TokenUsage,
    };
    use coachdesk_core::outputs::{BidEvaluation, MarkupRecommendation};
    use coachdesk_db::repositories::{
        CostRepository, DecisionLogRepository, InMemoryStore, SettingsRepository,
    };

    use super::{DecisionRequest, ExecutorError, RetryPolicy, TaskExecutor, BUDGET_EXCEEDED_REASON};
    use crate::confidence::ConfidenceEvaluator;
    use crate::cost::CostTracker;
    use crate::llm::{ChatMessage, ProviderError, ScriptedProvider};

    fn executor(
        store: &Arc<InMemoryStore>,
        provider: Arc<ScriptedProvider>,
        mode: BudgetMode,
    ) -> TaskExecutor {
        let costs = CostTracker::new(
            store.clone(),
            store.clone(),
            &BudgetConfig { daily_default: Decimal::new(50, 0), mode },
        );
        TaskExecutor::new(
            provider,
            Arc::new(ConfidenceEvaluator::new(store.clone())),
            store.clone(),
            Arc::new(costs),
            RetryPolicy::immediate(2),
        )
    }

    fn markup_request(run: &PipelineRunId) -> DecisionRequest<MarkupRecommendation> {
        DecisionRequest::for_output(
            vec![ChatMessage::user("price this trip")],
            DecisionTargets::default(),
            run.clone(),
        )
    }

    #[test]
    fn retry_policy_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(RetryPolicy::immediate(4).delay_after(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn success_after_retries_writes_one_entry_and_one_cost() {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(
            ScriptedProvider::new("openai", "gpt-4o")
                .fail::<MarkupRecommendation>(ProviderError::Timeout)
                .respond_with_usage::<MarkupRecommendation>(
                    json!({"markup_percent": 25.0, "confidence_score": 0.9}),
                    TokenUsage { prompt_tokens: 1_000, completion_tokens: 500 },
                ),
        );
        let executor = executor(&store, provider.clone(), BudgetMode::Advisory);
        let run = PipelineRunId::generate();

        let outcome = executor.execute(markup_request(&run)).await.expect("second attempt succeeds");

        assert!(outcome.auto_executed);
        assert_eq!(outcome.output.markup_percent, 25.0);
        assert_eq!(provider.call_count(), 2);

        let entries = store.list_for_run(&run).await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, DecisionAction::AutoExecuted);
        // 1000 * 2.50/1M + 500 * 10.00/1M
        assert_eq!(entries[0].estimated_cost, Decimal::new(75, 4));

        let spent = store.daily_spend("openai", chrono::Utc::now().date_naive()).await.expect("spend");
        assert_eq!(spent, entries[0].estimated_cost);
    }

    #[tokio::test]
    async fn low_confidence_is_logged_as_escalated_but_returned() {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(ScriptedProvider::new("openai", "gpt-4o").respond::<BidEvaluation>(
            json!({"rankings": [], "recommended_bid_id": "bid-1", "confidence_score": 0.79}),
        ));
        let executor = executor(&store, provider, BudgetMode::Advisory);
        let run = PipelineRunId::generate();

        let outcome = executor
            .execute(DecisionRequest::<BidEvaluation>::for_output(
                vec![ChatMessage::user("rank")],
                DecisionTargets::default(),
                run.clone(),
            ))
            .await
            .expect("call succeeds");

        assert!(!outcome.auto_executed);
        let entries = store.list_for_run(&run).await.expect("entries");
        assert_eq!(entries[0].action, DecisionAction::EscalatedToHuman);
        assert_eq!(entries[0].confidence_score, 0.79);
    }

    #[tokio::test]
    async fn low_confidence_markup_is_logged_as_committed_by_policy() {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(ScriptedProvider::new("openai", "gpt-4o").respond::<MarkupRecommendation>(
            json!({"markup_percent": 22.0, "confidence_score": 0.3}),
        ));
        let executor = executor(&store, provider, BudgetMode::Advisory);
        let run = PipelineRunId::generate();

        let outcome = executor.execute(markup_request(&run)).await.expect("call succeeds");

        assert!(!outcome.auto_executed);
        let entries = store.list_for_run(&run).await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, DecisionAction::AutoExecuted);
        assert_eq!(
            entries[0].escalation_reason.as_deref(),
            Some("confidence 0.30 below threshold 0.70; committed by policy")
        );
    }

    #[tokio::test]
    async fn exhaustion_writes_terminal_entry_and_no_cost() {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(
            ScriptedProvider::new("openai", "gpt-4o")
                .fail::<MarkupRecommendation>(ProviderError::RateLimited("slow down".to_string())),
        );
        let executor = executor(&store, provider.clone(), BudgetMode::Advisory);
        let run = PipelineRunId::generate();

        let error = executor.execute(markup_request(&run)).await.expect_err("always fails");
        let ExecutorError::Failed(failed) = error else {
            panic!("expected TaskFailed");
        };
        assert_eq!(failed.attempts, 3);
        assert!(failed.reason.contains("slow down"));
        assert_eq!(provider.call_count(), 3);

        let entries = store.list_for_run(&run).await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].confidence_score, 0.0);
        assert_eq!(entries[0].action, DecisionAction::EscalatedToHuman);
        assert_eq!(entries[0].usage, TokenUsage::default());
        assert_eq!(entries[0].estimated_cost, Decimal::ZERO);
        assert_eq!(Some(entries[0].id.clone()), failed.log_id);

        let breakdown = store.daily_breakdown(chrono::Utc::now().date_naive()).await.expect("spend");
        assert!(breakdown.is_empty());
    }

    #[tokio::test]
    async fn schema_invalid_output_is_retried() {
        let store = Arc::new(InMemoryStore::default());
        let provider = Arc::new(
            ScriptedProvider::new("openai", "gpt-4o")
                .respond::<MarkupRecommendation>(json!({"reasoning": "forgot the number"}))
                .respond::<MarkupRecommendation>(json!({"markup_percent": 18.0})),
        );
        let executor = executor(&store, provider.clone(), BudgetMode::Advisory);

        let outcome = executor
            .execute(markup_request(&PipelineRunId::generate()))
            .await
            .expect("retry recovers");
        assert_eq!(outcome.confidence, 1.0, "absent confidence defaults to 1.0");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn enforce_mode_refuses_calls_over_budget() {
        let store = Arc::new(InMemoryStore::default());
        store.set("budget.daily.openai", "0.004").await.expect("seed");
        let provider = Arc::new(
            ScriptedProvider::new("openai", "gpt-4o")
                .respond::<MarkupRecommendation>(json!({"markup_percent": 20.0})),
        );
        let executor = executor(&store, provider.clone(), BudgetMode::Enforce);

        executor.execute(markup_request(&PipelineRunId::generate())).await.expect("first call fits");

        let run = PipelineRunId::generate();
        let error = executor.execute(markup_request(&run)).await.expect_err("budget spent");
        let ExecutorError::Failed(failed) = error else {
            panic!("expected TaskFailed");
        };
        assert_eq!(failed.reason, BUDGET_EXCEEDED_REASON);
        assert_eq!(failed.attempts, 0);
        assert_eq!(provider.call_count(), 1);

        let entries = store.list_for_run(&run).await.expect("entries");
        assert_eq!(entries[0].escalation_reason.as_deref(), Some(BUDGET_EXCEEDED_REASON));
    }
}
