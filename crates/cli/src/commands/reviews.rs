use std::fs;
use std::path::Path;

use coachdesk_agent::reviews::{ReviewDesk, ReviewError};
use coachdesk_core::domain::review::ReviewTaskId;
use coachdesk_core::outputs::DecisionPayload;
use coachdesk_db::Repositories;
use serde_json::json;

use crate::commands::{block_on, load_config, open_pool, CommandResult, Failure};

#[derive(Debug, Clone)]
pub enum ReviewAction {
    List { limit: u32 },
    Resolve { id: String, note: String },
    Dismiss { id: String, note: String },
    /// Replacement output is read from a JSON file shaped like a decision payload
    /// (`{"decision_type": "...", "output": {...}}`); without one the decision is simply
    /// marked overridden.
    Override { id: String, note: String, payload_file: Option<String> },
}

pub fn run(action: ReviewAction) -> CommandResult {
    let result = load_config().and_then(|config| {
        block_on(async move {
            let pool = open_pool(&config).await?;
            let desk = ReviewDesk::from_repositories(&Repositories::sql(pool.clone()));
            let outcome = apply(&desk, action).await;
            pool.close().await;
            outcome
        })
    });

    match result {
        Ok((message, data)) => CommandResult::success_with("reviews", message, data),
        Err(failure) => failure.into_result("reviews"),
    }
}

async fn apply(
    desk: &ReviewDesk,
    action: ReviewAction,
) -> Result<(String, serde_json::Value), Failure> {
    match action {
        ReviewAction::List { limit } => {
            let tasks = desk.pending(limit).await.map_err(review_failure)?;
            Ok((format!("{} pending review task(s)", tasks.len()), json!(tasks)))
        }
        ReviewAction::Resolve { id, note } => {
            let task = desk.resolve(&ReviewTaskId::from(id.as_str()), &note).await.map_err(review_failure)?;
            Ok((format!("review task {} resolved", task.id), json!(task)))
        }
        ReviewAction::Dismiss { id, note } => {
            let task = desk.dismiss(&ReviewTaskId::from(id.as_str()), &note).await.map_err(review_failure)?;
            Ok((format!("review task {} dismissed", task.id), json!(task)))
        }
        ReviewAction::Override { id, note, payload_file } => {
            let replacement = payload_file.as_deref().map(|path| read_payload(Path::new(path))).transpose()?;
            let (task, entry_id) = desk
                .override_decision(&ReviewTaskId::from(id.as_str()), replacement, &note)
                .await
                .map_err(review_failure)?;
            Ok((
                format!("review task {} resolved with override entry {entry_id}", task.id),
                json!({ "task": task, "override_entry_id": entry_id }),
            ))
        }
    }
}

fn read_payload(path: &Path) -> Result<DecisionPayload, Failure> {
    let raw = fs::read_to_string(path)
        .map_err(|error| Failure::usage(format!("cannot read {}: {error}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|error| Failure::usage(format!("{} is not a decision payload: {error}", path.display())))
}

fn review_failure(error: ReviewError) -> Failure {
    match error {
        ReviewError::NotFound(_) | ReviewError::NothingToOverride(_) => {
            Failure::new("not_found", error.to_string(), 7)
        }
        ReviewError::DecisionTypeMismatch { .. } | ReviewError::Domain(_) => {
            Failure::new("invalid_state", error.to_string(), 6)
        }
        ReviewError::Storage(_) => Failure::new("storage", error.to_string(), 6),
    }
}
