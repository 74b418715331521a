use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::decision::{DecisionLogId, DecisionType};
use coachdesk_core::domain::review::{
    HumanReviewTask, ReviewReason, ReviewStatus, ReviewTarget, ReviewTaskId, TargetKind,
};

use super::codec::{
    decode_enum, encode_json, encode_optional_timestamp, encode_timestamp, parse_json,
    parse_optional_timestamp, parse_timestamp,
};
use super::{RepositoryError, ReviewTaskRepository};
use crate::DbPool;

const REVIEW_COLUMNS: &str = "id, decision_type, target_kind, target_id, decision_log_id,
    reason, context_json, status, resolution_note, resolved_at, created_at";

pub struct SqlReviewTaskRepository {
    pool: DbPool,
}

impl SqlReviewTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReviewTaskRepository for SqlReviewTaskRepository {
    async fn find_by_id(
        &self,
        id: &ReviewTaskId,
    ) -> Result<Option<HumanReviewTask>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM human_review_task WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn save(&self, task: HumanReviewTask) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO human_review_task (
                id, decision_type, target_kind, target_id, decision_log_id, reason, context_json,
                status, resolution_note, resolved_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                resolution_note = excluded.resolution_note,
                resolved_at = excluded.resolved_at",
        )
        .bind(&task.id.0)
        .bind(task.decision_type.as_str())
        .bind(task.target.kind.as_str())
        .bind(&task.target.id)
        .bind(task.decision_log_id.as_ref().map(|id| id.0.as_str()))
        .bind(task.reason.as_str())
        .bind(encode_json("context", &task.context)?)
        .bind(task.status.as_str())
        .bind(&task.resolution_note)
        .bind(encode_optional_timestamp(task.resolved_at))
        .bind(encode_timestamp(task.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<HumanReviewTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM human_review_task
             WHERE status = ?
             ORDER BY created_at ASC
             LIMIT ?"
        ))
        .bind(ReviewStatus::Pending.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    async fn list_for_target(
        &self,
        target_id: &str,
    ) -> Result<Vec<HumanReviewTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM human_review_task
             WHERE target_id = ?
             ORDER BY created_at ASC"
        ))
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }
}

fn task_from_row(row: &SqliteRow) -> Result<HumanReviewTask, RepositoryError> {
    let decision_type: String = row.try_get("decision_type")?;
    let target_kind: String = row.try_get("target_kind")?;
    let reason: String = row.try_get("reason")?;
    let status: String = row.try_get("status")?;
    let context: String = row.try_get("context_json")?;
    let decision_log_id: Option<String> = row.try_get("decision_log_id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(HumanReviewTask {
        id: ReviewTaskId(row.try_get("id")?),
        decision_type: decode_enum("decision type", &decision_type, DecisionType::parse)?,
        target: ReviewTarget {
            kind: decode_enum("review target kind", &target_kind, TargetKind::parse)?,
            id: row.try_get("target_id")?,
        },
        decision_log_id: decision_log_id.map(DecisionLogId),
        reason: decode_enum("review reason", &reason, ReviewReason::parse)?,
        context: parse_json("context", &context)?,
        status: decode_enum("review status", &status, ReviewStatus::parse)?,
        resolution_note: row.try_get("resolution_note")?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
