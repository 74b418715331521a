use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::booking::{
    AssignmentDetails, Booking, BookingId, BookingStatus, BookingStatusHistory,
};
use coachdesk_core::domain::customer::CustomerId;
use coachdesk_core::domain::enquiry::EnquiryId;
use coachdesk_core::domain::quote::CustomerQuoteId;
use coachdesk_core::domain::supplier::{BidId, SupplierId};

use super::codec::{
    decode_enum, encode_optional_timestamp, encode_timestamp, parse_decimal,
    parse_optional_timestamp, parse_timestamp, to_u64,
};
use super::{BookingRepository, RepositoryError};
use crate::DbPool;

const BOOKING_COLUMNS: &str = "id, reference, quote_id, enquiry_id, customer_id, supplier_id,
    bid_id, total, status, vehicle_description, vehicle_registration, driver_name, driver_phone,
    completed_at, created_at";

pub struct SqlBookingRepository {
    pool: DbPool,
}

impl SqlBookingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BookingRepository for SqlBookingRepository {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn find_by_quote(
        &self,
        quote_id: &CustomerQuoteId,
    ) -> Result<Option<Booking>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE quote_id = ?"))
                .bind(&quote_id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(booking_from_row).transpose()
    }

    async fn save(&self, booking: Booking) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO booking (
                id, reference, quote_id, enquiry_id, customer_id, supplier_id, bid_id, total,
                status, vehicle_description, vehicle_registration, driver_name, driver_phone,
                completed_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                vehicle_description = excluded.vehicle_description,
                vehicle_registration = excluded.vehicle_registration,
                driver_name = excluded.driver_name,
                driver_phone = excluded.driver_phone,
                completed_at = excluded.completed_at",
        )
        .bind(&booking.id.0)
        .bind(&booking.reference)
        .bind(&booking.quote_id.0)
        .bind(&booking.enquiry_id.0)
        .bind(&booking.customer_id.0)
        .bind(&booking.supplier_id.0)
        .bind(&booking.bid_id.0)
        .bind(booking.total.to_string())
        .bind(booking.status.as_str())
        .bind(&booking.assignment.vehicle_description)
        .bind(&booking.assignment.vehicle_registration)
        .bind(&booking.assignment.driver_name)
        .bind(&booking.assignment.driver_phone)
        .bind(encode_optional_timestamp(booking.completed_at))
        .bind(encode_timestamp(booking.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_history(&self, entry: BookingStatusHistory) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO booking_status_history (booking_id, from_status, to_status, note, changed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.booking_id.0)
        .bind(entry.from_status.map(|status| status.as_str()))
        .bind(entry.to_status.as_str())
        .bind(&entry.note)
        .bind(encode_timestamp(entry.changed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingStatusHistory>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT booking_id, from_status, to_status, note, changed_at
             FROM booking_status_history
             WHERE booking_id = ?
             ORDER BY id ASC",
        )
        .bind(&booking_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn list_completed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM booking
             WHERE status = ? AND completed_at >= ? AND completed_at < ?
             ORDER BY completed_at ASC"
        ))
        .bind(BookingStatus::Completed.as_str())
        .bind(encode_timestamp(from))
        .bind(encode_timestamp(until))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(booking_from_row).collect()
    }

    async fn count_by_status(&self, status: BookingStatus) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS total FROM booking WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        to_u64("booking count", count)
    }
}

fn booking_from_row(row: &SqliteRow) -> Result<Booking, RepositoryError> {
    let total: String = row.try_get("total")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Booking {
        id: BookingId(row.try_get("id")?),
        reference: row.try_get("reference")?,
        quote_id: CustomerQuoteId(row.try_get("quote_id")?),
        enquiry_id: EnquiryId(row.try_get("enquiry_id")?),
        customer_id: CustomerId(row.try_get("customer_id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        bid_id: BidId(row.try_get("bid_id")?),
        total: parse_decimal("total", &total)?,
        status: decode_enum("booking status", &status, BookingStatus::parse)?,
        assignment: AssignmentDetails {
            vehicle_description: row.try_get("vehicle_description")?,
            vehicle_registration: row.try_get("vehicle_registration")?,
            driver_name: row.try_get("driver_name")?,
            driver_phone: row.try_get("driver_phone")?,
        },
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<BookingStatusHistory, RepositoryError> {
    let from_status: Option<String> = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;
    let changed_at: String = row.try_get("changed_at")?;

    Ok(BookingStatusHistory {
        booking_id: BookingId(row.try_get("booking_id")?),
        from_status: from_status
            .map(|raw| decode_enum("booking status", &raw, BookingStatus::parse))
            .transpose()?,
        to_status: decode_enum("booking status", &to_status, BookingStatus::parse)?,
        note: row.try_get("note")?,
        changed_at: parse_timestamp("changed_at", &changed_at)?,
    })
}
