use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::booking::BookingId;
use coachdesk_core::domain::decision::{
    DecisionAction, DecisionLogEntry, DecisionLogId, DecisionTargets, DecisionType,
    PipelineRunId, TokenUsage,
};
use coachdesk_core::domain::enquiry::EnquiryId;
use coachdesk_core::domain::quote::CustomerQuoteId;

use super::codec::{
    decode_enum, encode_json, encode_timestamp, parse_decimal, parse_json, parse_timestamp,
    to_u32, to_u64,
};
use super::{DecisionLogRepository, RepositoryError};
use crate::DbPool;

const DECISION_COLUMNS: &str = "id, decision_type, pipeline_run_id, provider, model,
    prompt_json, raw_response_json, parsed_output_json, confidence_score, action,
    escalation_reason, prompt_tokens, completion_tokens, latency_ms, estimated_cost,
    enquiry_id, quote_id, booking_id, overrides_entry_id, created_at";

pub struct SqlDecisionLogRepository {
    pool: DbPool,
}

impl SqlDecisionLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DecisionLogRepository for SqlDecisionLogRepository {
    async fn append(&self, entry: DecisionLogEntry) -> Result<DecisionLogId, RepositoryError> {
        let raw_response =
            entry.raw_response.as_ref().map(|raw| encode_json("raw_response", raw)).transpose()?;
        let parsed_output = entry
            .parsed_output
            .as_ref()
            .map(|parsed| encode_json("parsed_output", parsed))
            .transpose()?;
        let latency_ms = i64::try_from(entry.latency_ms).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO decision_log (
                id, decision_type, pipeline_run_id, provider, model, prompt_json,
                raw_response_json, parsed_output_json, confidence_score, action,
                escalation_reason, prompt_tokens, completion_tokens, latency_ms, estimated_cost,
                enquiry_id, quote_id, booking_id, overrides_entry_id, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(entry.decision_type.as_str())
        .bind(&entry.pipeline_run_id.0)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(encode_json("prompt", &entry.prompt)?)
        .bind(raw_response)
        .bind(parsed_output)
        .bind(entry.confidence_score)
        .bind(entry.action.as_str())
        .bind(&entry.escalation_reason)
        .bind(i64::from(entry.usage.prompt_tokens))
        .bind(i64::from(entry.usage.completion_tokens))
        .bind(latency_ms)
        .bind(entry.estimated_cost.to_string())
        .bind(entry.targets.enquiry_id.as_ref().map(|id| id.0.as_str()))
        .bind(entry.targets.quote_id.as_ref().map(|id| id.0.as_str()))
        .bind(entry.targets.booking_id.as_ref().map(|id| id.0.as_str()))
        .bind(entry.overrides_entry_id.as_ref().map(|id| id.0.as_str()))
        .bind(encode_timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;

        Ok(entry.id)
    }

    async fn find_by_id(
        &self,
        id: &DecisionLogId,
    ) -> Result<Option<DecisionLogEntry>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {DECISION_COLUMNS} FROM decision_log WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_for_run(
        &self,
        run_id: &PipelineRunId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM decision_log
             WHERE pipeline_run_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DECISION_COLUMNS} FROM decision_log
             WHERE enquiry_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&enquiry_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<DecisionLogEntry, RepositoryError> {
    let decision_type: String = row.try_get("decision_type")?;
    let action: String = row.try_get("action")?;
    let prompt: String = row.try_get("prompt_json")?;
    let raw_response: Option<String> = row.try_get("raw_response_json")?;
    let parsed_output: Option<String> = row.try_get("parsed_output_json")?;
    let estimated_cost: String = row.try_get("estimated_cost")?;
    let created_at: String = row.try_get("created_at")?;
    let enquiry_id: Option<String> = row.try_get("enquiry_id")?;
    let quote_id: Option<String> = row.try_get("quote_id")?;
    let booking_id: Option<String> = row.try_get("booking_id")?;
    let overrides_entry_id: Option<String> = row.try_get("overrides_entry_id")?;

    Ok(DecisionLogEntry {
        id: DecisionLogId(row.try_get("id")?),
        decision_type: decode_enum("decision type", &decision_type, DecisionType::parse)?,
        pipeline_run_id: PipelineRunId(row.try_get("pipeline_run_id")?),
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        prompt: parse_json("prompt", &prompt)?,
        raw_response: raw_response.map(|raw| parse_json("raw_response", &raw)).transpose()?,
        parsed_output: parsed_output
            .map(|raw| parse_json("parsed_output", &raw))
            .transpose()?,
        confidence_score: row.try_get("confidence_score")?,
        action: decode_enum("decision action", &action, DecisionAction::parse)?,
        escalation_reason: row.try_get("escalation_reason")?,
        usage: TokenUsage {
            prompt_tokens: to_u32("prompt_tokens", row.try_get("prompt_tokens")?)?,
            completion_tokens: to_u32("completion_tokens", row.try_get("completion_tokens")?)?,
        },
        latency_ms: to_u64("latency_ms", row.try_get("latency_ms")?)?,
        estimated_cost: parse_decimal("estimated_cost", &estimated_cost)?,
        targets: DecisionTargets {
            enquiry_id: enquiry_id.map(EnquiryId),
            quote_id: quote_id.map(CustomerQuoteId),
            booking_id: booking_id.map(BookingId),
        },
        overrides_entry_id: overrides_entry_id.map(DecisionLogId),
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
