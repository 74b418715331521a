use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::customer::CustomerId;
use coachdesk_core::domain::enquiry::EnquiryId;
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteCopy, QuoteStatus};
use coachdesk_core::domain::supplier::BidId;
use coachdesk_core::pricing::QuoteBreakdown;

use super::codec::{
    decode_enum, encode_optional_timestamp, encode_timestamp, parse_decimal,
    parse_optional_timestamp, parse_timestamp,
};
use super::{CustomerQuoteRepository, RepositoryError};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, reference, enquiry_id, customer_id, winning_bid_id,
    supplier_price, markup_percent, markup_amount, subtotal, tax_rate, tax_amount, total,
    currency, headline, body, markup_reasoning, acceptance_probability, status, valid_until,
    sent_at, created_at";

pub struct SqlCustomerQuoteRepository {
    pool: DbPool,
}

impl SqlCustomerQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerQuoteRepository for SqlCustomerQuoteRepository {
    async fn find_by_id(
        &self,
        id: &CustomerQuoteId,
    ) -> Result<Option<CustomerQuote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM customer_quote WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(quote_from_row).transpose()
    }

    async fn find_latest_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Option<CustomerQuote>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM customer_quote
             WHERE enquiry_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(&enquiry_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(quote_from_row).transpose()
    }

    async fn save(&self, quote: CustomerQuote) -> Result<(), RepositoryError> {
        let pricing = quote.pricing;

        sqlx::query(
            "INSERT INTO customer_quote (
                id, reference, enquiry_id, customer_id, winning_bid_id, supplier_price,
                markup_percent, markup_amount, subtotal, tax_rate, tax_amount, total, currency,
                headline, body, markup_reasoning, acceptance_probability, status, valid_until,
                sent_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                headline = excluded.headline,
                body = excluded.body,
                markup_reasoning = excluded.markup_reasoning,
                acceptance_probability = excluded.acceptance_probability,
                status = excluded.status,
                valid_until = excluded.valid_until,
                sent_at = excluded.sent_at",
        )
        .bind(&quote.id.0)
        .bind(&quote.reference)
        .bind(&quote.enquiry_id.0)
        .bind(&quote.customer_id.0)
        .bind(&quote.winning_bid_id.0)
        .bind(pricing.supplier_price.to_string())
        .bind(pricing.markup_percent.to_string())
        .bind(pricing.markup_amount.to_string())
        .bind(pricing.subtotal.to_string())
        .bind(pricing.tax_rate.to_string())
        .bind(pricing.tax_amount.to_string())
        .bind(pricing.total.to_string())
        .bind(&quote.currency)
        .bind(&quote.copy.headline)
        .bind(&quote.copy.body)
        .bind(&quote.copy.markup_reasoning)
        .bind(quote.copy.acceptance_probability)
        .bind(quote.status.as_str())
        .bind(encode_timestamp(quote.valid_until))
        .bind(encode_optional_timestamp(quote.sent_at))
        .bind(encode_timestamp(quote.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_status(
        &self,
        id: &CustomerQuoteId,
        expected: QuoteStatus,
        next: QuoteStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let sent_at = (next == QuoteStatus::SentToCustomer).then(|| encode_timestamp(at));

        let result = sqlx::query(
            "UPDATE customer_quote SET status = ?, sent_at = COALESCE(?, sent_at)
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(sent_at)
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE customer_quote SET status = ? WHERE status = ? AND valid_until < ?",
        )
        .bind(QuoteStatus::Expired.as_str())
        .bind(QuoteStatus::SentToCustomer.as_str())
        .bind(encode_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn quote_from_row(row: &SqliteRow) -> Result<CustomerQuote, RepositoryError> {
    let amount = |column: &str| -> Result<_, RepositoryError> {
        let raw: String = row.try_get(column)?;
        parse_decimal(column, &raw)
    };
    let status: String = row.try_get("status")?;
    let valid_until: String = row.try_get("valid_until")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(CustomerQuote {
        id: CustomerQuoteId(row.try_get("id")?),
        reference: row.try_get("reference")?,
        enquiry_id: EnquiryId(row.try_get("enquiry_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        winning_bid_id: BidId(row.try_get("winning_bid_id")?),
        pricing: QuoteBreakdown {
            supplier_price: amount("supplier_price")?,
            markup_percent: amount("markup_percent")?,
            markup_amount: amount("markup_amount")?,
            subtotal: amount("subtotal")?,
            tax_rate: amount("tax_rate")?,
            tax_amount: amount("tax_amount")?,
            total: amount("total")?,
        },
        currency: row.try_get("currency")?,
        copy: QuoteCopy {
            headline: row.try_get("headline")?,
            body: row.try_get("body")?,
            markup_reasoning: row.try_get("markup_reasoning")?,
            acceptance_probability: row.try_get("acceptance_probability")?,
        },
        status: decode_enum("quote status", &status, QuoteStatus::parse)?,
        valid_until: parse_timestamp("valid_until", &valid_until)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}
