//! Reviewer actions on escalated decisions.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use coachdesk_core::domain::decision::{DecisionLogEntry, DecisionLogId};
use coachdesk_core::domain::review::{HumanReviewTask, ReviewTaskId};
use coachdesk_core::errors::DomainError;
use coachdesk_core::outputs::DecisionPayload;
use coachdesk_db::repositories::{
    DecisionLogRepository, Repositories, RepositoryError, ReviewTaskRepository,
};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review task not found: {0}")]
    NotFound(ReviewTaskId),
    #[error("review task {0} has no decision log entry to override")]
    NothingToOverride(ReviewTaskId),
    #[error("replacement is a {replacement} output but the decision was {original}")]
    DecisionTypeMismatch { original: &'static str, replacement: &'static str },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct ReviewDesk {
    reviews: Arc<dyn ReviewTaskRepository>,
    decisions: Arc<dyn DecisionLogRepository>,
}

impl ReviewDesk {
    pub fn new(
        reviews: Arc<dyn ReviewTaskRepository>,
        decisions: Arc<dyn DecisionLogRepository>,
    ) -> Self {
        Self { reviews, decisions }
    }

    pub fn from_repositories(repos: &Repositories) -> Self {
        Self::new(repos.reviews.clone(), repos.decisions.clone())
    }

    pub async fn pending(&self, limit: u32) -> Result<Vec<HumanReviewTask>, ReviewError> {
        Ok(self.reviews.list_pending(limit).await?)
    }

    pub async fn resolve(&self, id: &ReviewTaskId, note: &str) -> Result<HumanReviewTask, ReviewError> {
        let mut task = self.load(id).await?;
        task.resolve(note)?;
        self.reviews.save(task.clone()).await?;
        info!(event_name = "reviews.resolved", review_task_id = %id, "review task resolved");
        Ok(task)
    }

    pub async fn dismiss(&self, id: &ReviewTaskId, note: &str) -> Result<HumanReviewTask, ReviewError> {
        let mut task = self.load(id).await?;
        task.dismiss(note)?;
        self.reviews.save(task.clone()).await?;
        info!(event_name = "reviews.dismissed", review_task_id = %id, "review task dismissed");
        Ok(task)
    }

    /// Resolves the task and appends an `OVERRIDDEN` entry pointing at the escalated one.
    /// The original entry is never modified.
    pub async fn override_decision(
        &self,
        id: &ReviewTaskId,
        replacement: Option<DecisionPayload>,
        note: &str,
    ) -> Result<(HumanReviewTask, DecisionLogId), ReviewError> {
        let mut task = self.load(id).await?;
        let original_id =
            task.decision_log_id.clone().ok_or_else(|| ReviewError::NothingToOverride(id.clone()))?;
        let original = self
            .decisions
            .find_by_id(&original_id)
            .await?
            .ok_or_else(|| ReviewError::NothingToOverride(id.clone()))?;

        if let Some(payload) = &replacement {
            if payload.decision_type() != original.decision_type {
                return Err(ReviewError::DecisionTypeMismatch {
                    original: original.decision_type.as_str(),
                    replacement: payload.decision_type().as_str(),
                });
            }
        }

        task.resolve(note)?;
        let entry = DecisionLogEntry::override_of(&original, replacement, note);
        let entry_id = self.decisions.append(entry).await?;
        self.reviews.save(task.clone()).await?;

        info!(
            event_name = "reviews.overridden",
            review_task_id = %id,
            overrides_entry_id = %original_id,
            entry_id = %entry_id,
            "decision overridden by reviewer"
        );
        Ok((task, entry_id))
    }

    async fn load(&self, id: &ReviewTaskId) -> Result<HumanReviewTask, ReviewError> {
        self.reviews.find_by_id(id).await?.ok_or_else(|| ReviewError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    use coachdesk_core::domain::decision::{
        DecisionAction, DecisionLogEntry, DecisionLogId, DecisionTargets, DecisionType,
        PipelineRunId, TokenUsage,
    };
    use coachdesk_core::domain::review::{
        HumanReviewTask, ReviewReason, ReviewStatus, ReviewTarget, TargetKind,
    };
    use coachdesk_core::outputs::{DecisionPayload, MarkupRecommendation, PersonalizedEmail};
    use coachdesk_db::repositories::{
        DecisionLogRepository, InMemoryStore, Repositories, ReviewTaskRepository,
    };

    use super::{ReviewDesk, ReviewError};

    fn escalated_entry() -> DecisionLogEntry {
        DecisionLogEntry {
            id: DecisionLogId::generate(),
            decision_type: DecisionType::MarkupCalculation,
            pipeline_run_id: PipelineRunId::generate(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            prompt: json!([]),
            raw_response: Some(json!({"markup_percent": 40.0, "confidence_score": 0.4})),
            parsed_output: None,
            confidence_score: 0.4,
            action: DecisionAction::EscalatedToHuman,
            escalation_reason: Some("confidence 0.40 below threshold 0.70".to_string()),
            usage: TokenUsage { prompt_tokens: 900, completion_tokens: 80 },
            latency_ms: 640,
            estimated_cost: Decimal::new(305, 5),
            targets: DecisionTargets::default(),
            overrides_entry_id: None,
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> (Arc<InMemoryStore>, ReviewDesk, HumanReviewTask, DecisionLogId) {
        let store = Arc::new(InMemoryStore::default());
        let entry = escalated_entry();
        let entry_id = store.append(entry).await.expect("append");
        let task = HumanReviewTask::open(
            DecisionType::MarkupCalculation,
            ReviewTarget { kind: TargetKind::Enquiry, id: "enq-1".to_string() },
            Some(entry_id.clone()),
            ReviewReason::LowConfidence,
            json!({"confidence": 0.4}),
        );
        ReviewTaskRepository::save(store.as_ref(), task.clone()).await.expect("save");
        let desk = ReviewDesk::from_repositories(&Repositories::from_store(store.clone()));
        (store, desk, task, entry_id)
    }

    #[tokio::test]
    async fn resolved_task_cannot_be_dismissed() {
        let (_, desk, task, _) = seeded().await;
        let resolved = desk.resolve(&task.id, "priced manually").await.expect("resolve");
        assert_eq!(resolved.status, ReviewStatus::Resolved);

        assert!(matches!(desk.dismiss(&task.id, "late").await, Err(ReviewError::Domain(_))));
        assert!(desk.pending(10).await.expect("pending").is_empty());
    }

    #[tokio::test]
    async fn override_appends_entry_and_keeps_original() {
        let (store, desk, task, original_id) = seeded().await;
        let replacement = DecisionPayload::MarkupCalculation(MarkupRecommendation {
            markup_percent: 22.0,
            reasoning: Some("repeat customer".to_string()),
            acceptance_probability: None,
            confidence_score: None,
        });

        let (task, entry_id) =
            desk.override_decision(&task.id, Some(replacement), "use 22%").await.expect("override");
        assert_eq!(task.status, ReviewStatus::Resolved);

        let appended = DecisionLogRepository::find_by_id(store.as_ref(), &entry_id).await.expect("read").expect("entry");
        assert_eq!(appended.action, DecisionAction::Overridden);
        assert_eq!(appended.overrides_entry_id, Some(original_id.clone()));

        let original = DecisionLogRepository::find_by_id(store.as_ref(), &original_id).await.expect("read").expect("entry");
        assert_eq!(original.action, DecisionAction::EscalatedToHuman);
    }

    #[tokio::test]
    async fn override_rejects_a_payload_of_another_type() {
        let (_, desk, task, _) = seeded().await;
        let wrong = DecisionPayload::EmailPersonalization(PersonalizedEmail {
            subject: "hi".to_string(),
            html_body: "<p>hi</p>".to_string(),
            confidence_score: None,
        });
        assert!(matches!(
            desk.override_decision(&task.id, Some(wrong), "oops").await,
            Err(ReviewError::DecisionTypeMismatch { .. })
        ));
    }
}
