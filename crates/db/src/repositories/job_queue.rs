use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::job::{Job, JobCategory, JobId, JobKind, JobState};

use super::codec::{
    decode_enum, encode_json, encode_optional_timestamp, encode_timestamp, parse_json,
    parse_optional_timestamp, parse_timestamp, to_u32,
};
use super::{JobQueueRepository, RepositoryError};
use crate::DbPool;

const JOB_COLUMNS: &str = "id, category, kind, payload_json, dedupe_key, state, retry_count,
    max_retries, available_at, claimed_by, claimed_at, last_error, created_at, updated_at";

pub struct SqlJobQueueRepository {
    pool: DbPool,
}

impl SqlJobQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobQueueRepository for SqlJobQueueRepository {
    async fn enqueue(&self, job: Job) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO job (
                id, category, kind, payload_json, dedupe_key, state, retry_count, max_retries,
                available_at, claimed_by, claimed_at, last_error, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id.0)
        .bind(job.category.as_str())
        .bind(job.kind.as_str())
        .bind(encode_json("payload", &job.payload)?)
        .bind(&job.dedupe_key)
        .bind(job.state.as_str())
        .bind(i64::from(job.retry_count))
        .bind(i64::from(job.max_retries))
        .bind(encode_timestamp(job.available_at))
        .bind(&job.claimed_by)
        .bind(encode_optional_timestamp(job.claimed_at))
        .bind(&job.last_error)
        .bind(encode_timestamp(job.created_at))
        .bind(encode_timestamp(job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_next(
        &self,
        category: JobCategory,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError> {
        let now = encode_timestamp(now);
        let row = sqlx::query(&format!(
            "UPDATE job SET state = ?, claimed_by = ?, claimed_at = ?, updated_at = ?
             WHERE id = (
                SELECT id FROM job
                WHERE category = ? AND state IN (?, ?) AND available_at <= ?
                ORDER BY available_at ASC, created_at ASC
                LIMIT 1
             )
             AND state IN (?, ?)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(JobState::Running.as_str())
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(category.as_str())
        .bind(JobState::Queued.as_str())
        .bind(JobState::RetryableFailed.as_str())
        .bind(&now)
        .bind(JobState::Queued.as_str())
        .bind(JobState::RetryableFailed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn save(&self, job: Job) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE job SET
                state = ?,
                retry_count = ?,
                max_retries = ?,
                available_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(job.state.as_str())
        .bind(i64::from(job.retry_count))
        .bind(i64::from(job.max_retries))
        .bind(encode_timestamp(job.available_at))
        .bind(&job.claimed_by)
        .bind(encode_optional_timestamp(job.claimed_at))
        .bind(&job.last_error)
        .bind(encode_timestamp(job.updated_at))
        .bind(&job.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Job>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job WHERE dedupe_key = ?"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE state = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE job SET state = ?, claimed_by = NULL, claimed_at = NULL, updated_at = ?
             WHERE state = ? AND claimed_at < ?",
        )
        .bind(JobState::RetryableFailed.as_str())
        .bind(encode_timestamp(Utc::now()))
        .bind(JobState::Running.as_str())
        .bind(encode_timestamp(claimed_before))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job, RepositoryError> {
    let category: String = row.try_get("category")?;
    let kind: String = row.try_get("kind")?;
    let state: String = row.try_get("state")?;
    let payload: String = row.try_get("payload_json")?;
    let available_at: String = row.try_get("available_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: JobId(row.try_get("id")?),
        category: decode_enum("job category", &category, JobCategory::parse)?,
        kind: decode_enum("job kind", &kind, JobKind::parse)?,
        payload: parse_json("payload", &payload)?,
        dedupe_key: row.try_get("dedupe_key")?,
        state: decode_enum("job state", &state, JobState::parse)?,
        retry_count: to_u32("retry_count", row.try_get("retry_count")?)?,
        max_retries: to_u32("max_retries", row.try_get("max_retries")?)?,
        available_at: parse_timestamp("available_at", &available_at)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}
