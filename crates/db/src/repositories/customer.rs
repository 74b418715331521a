use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::customer::{normalize_email, Customer, CustomerHistory, CustomerId};

use super::codec::{encode_timestamp, parse_decimal, parse_timestamp, to_u32};
use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, email, phone, created_at FROM customer WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        let row =
            sqlx::query("SELECT id, name, email, phone, created_at FROM customer WHERE email = ?")
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(customer_from_row).transpose()
    }

    async fn save(&self, customer: Customer) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer (id, name, email, phone, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone",
        )
        .bind(&customer.id.0)
        .bind(&customer.name)
        .bind(normalize_email(&customer.email))
        .bind(&customer.phone)
        .bind(encode_timestamp(customer.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, id: &CustomerId) -> Result<CustomerHistory, RepositoryError> {
        let quote_row = sqlx::query(
            "SELECT
                COUNT(*) AS sent,
                COALESCE(SUM(CASE WHEN status = 'accepted' THEN 1 ELSE 0 END), 0) AS accepted
             FROM customer_quote
             WHERE customer_id = ? AND status != 'draft'",
        )
        .bind(&id.0)
        .fetch_one(&self.pool)
        .await?;

        let totals: Vec<String> =
            sqlx::query("SELECT total FROM booking WHERE customer_id = ? AND status != 'cancelled'")
                .bind(&id.0)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>("total"))
                .collect::<Result<_, _>>()?;

        let totals = totals
            .iter()
            .map(|raw| parse_decimal("booking total", raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CustomerHistory {
            prior_booking_count: to_u32("prior_booking_count", totals.len() as i64)?,
            quotes_sent: to_u32("quotes_sent", quote_row.try_get("sent")?)?,
            quotes_accepted: to_u32("quotes_accepted", quote_row.try_get("accepted")?)?,
            average_spend: average(&totals),
        })
    }
}

pub(crate) fn average(amounts: &[Decimal]) -> Option<Decimal> {
    if amounts.is_empty() {
        return None;
    }
    let sum: Decimal = amounts.iter().copied().sum();
    Some((sum / Decimal::from(amounts.len() as u64)).round_dp(2))
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
