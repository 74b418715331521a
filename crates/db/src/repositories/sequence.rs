use sqlx::Row;

use super::codec::to_u64;
use super::{RepositoryError, SequenceRepository};
use crate::DbPool;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn next_value(&self, name: &str) -> Result<u64, RepositoryError> {
        let value: i64 = sqlx::query(
            "INSERT INTO sequence (name, value) VALUES (?, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?
        .try_get("value")?;

        to_u64("sequence value", value)
    }
}
