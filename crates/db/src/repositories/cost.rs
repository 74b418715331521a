use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::Row;

use coachdesk_core::domain::decision::{CostRecord, DecisionType};

use super::codec::{cost_from_nanos, cost_to_nanos, decode_enum, encode_day, encode_timestamp, to_u64};
use super::{CostRepository, RepositoryError, SpendLine};
use crate::DbPool;

pub struct SqlCostRepository {
    pool: DbPool,
}

impl SqlCostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CostRepository for SqlCostRepository {
    async fn record(&self, record: CostRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO cost_record (
                id, day, decision_type, provider, model, prompt_tokens, completion_tokens,
                cost, cost_nanos, decision_log_id, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(encode_day(record.day))
        .bind(record.decision_type.as_str())
        .bind(&record.provider)
        .bind(&record.model)
        .bind(i64::from(record.usage.prompt_tokens))
        .bind(i64::from(record.usage.completion_tokens))
        .bind(record.cost.to_string())
        .bind(cost_to_nanos(record.cost)?)
        .bind(record.decision_log_id.as_ref().map(|id| id.0.as_str()))
        .bind(encode_timestamp(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn daily_spend(&self, provider: &str, day: NaiveDate) -> Result<Decimal, RepositoryError> {
        let nanos: i64 = sqlx::query(
            "SELECT COALESCE(SUM(cost_nanos), 0) AS spent
             FROM cost_record
             WHERE provider = ? AND day = ?",
        )
        .bind(provider)
        .bind(encode_day(day))
        .fetch_one(&self.pool)
        .await?
        .try_get("spent")?;

        Ok(cost_from_nanos(nanos))
    }

    async fn daily_breakdown(&self, day: NaiveDate) -> Result<Vec<SpendLine>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                decision_type,
                COUNT(*) AS calls,
                COALESCE(SUM(prompt_tokens), 0) AS prompt_tokens,
                COALESCE(SUM(completion_tokens), 0) AS completion_tokens,
                COALESCE(SUM(cost_nanos), 0) AS spent
             FROM cost_record
             WHERE day = ?
             GROUP BY decision_type
             ORDER BY decision_type ASC",
        )
        .bind(encode_day(day))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SpendLine, RepositoryError> {
                let decision_type: String = row.try_get("decision_type")?;
                Ok(SpendLine {
                    decision_type: decode_enum("decision type", &decision_type, DecisionType::parse)?,
                    calls: to_u64("calls", row.try_get("calls")?)?,
                    prompt_tokens: to_u64("prompt_tokens", row.try_get("prompt_tokens")?)?,
                    completion_tokens: to_u64(
                        "completion_tokens",
                        row.try_get("completion_tokens")?,
                    )?,
                    cost: cost_from_nanos(row.try_get("spent")?),
                })
            })
            .collect()
    }
}
