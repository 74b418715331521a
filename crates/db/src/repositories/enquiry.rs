use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::customer::CustomerId;
use coachdesk_core::domain::enquiry::{
    Enquiry, EnquiryEnrichment, EnquiryId, EnquirySource, EnquiryStatus, PriceBand, TripDetails,
    TripType,
};

use super::codec::{
    decode_enum, encode_optional_timestamp, encode_timestamp, parse_optional_decimal,
    parse_optional_timestamp, parse_timestamp, to_u32,
};
use super::{EnquiryRepository, RepositoryError};
use crate::DbPool;

const ENQUIRY_COLUMNS: &str = "id, reference, customer_id, status, source, contact_name,
    contact_email, contact_phone, pickup_location, dropoff_location, departure_at, return_at,
    passenger_count, trip_type, special_requirements, complexity_score, suggested_vehicle_type,
    estimated_price_min, estimated_price_max, quality_score, analysis_notes,
    sent_to_suppliers_at, created_at, updated_at";

pub struct SqlEnquiryRepository {
    pool: DbPool,
}

impl SqlEnquiryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EnquiryRepository for SqlEnquiryRepository {
    async fn find_by_id(&self, id: &EnquiryId) -> Result<Option<Enquiry>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ENQUIRY_COLUMNS} FROM enquiry WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(enquiry_from_row).transpose()
    }

    async fn save(&self, enquiry: Enquiry) -> Result<(), RepositoryError> {
        let band = enquiry.enrichment.estimated_price;

        sqlx::query(
            "INSERT INTO enquiry (
                id, reference, customer_id, status, source, contact_name, contact_email,
                contact_phone, pickup_location, dropoff_location, departure_at, return_at,
                passenger_count, trip_type, special_requirements, complexity_score,
                suggested_vehicle_type, estimated_price_min, estimated_price_max, quality_score,
                analysis_notes, sent_to_suppliers_at, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                contact_name = excluded.contact_name,
                contact_email = excluded.contact_email,
                contact_phone = excluded.contact_phone,
                pickup_location = excluded.pickup_location,
                dropoff_location = excluded.dropoff_location,
                departure_at = excluded.departure_at,
                return_at = excluded.return_at,
                passenger_count = excluded.passenger_count,
                trip_type = excluded.trip_type,
                special_requirements = excluded.special_requirements,
                complexity_score = excluded.complexity_score,
                suggested_vehicle_type = excluded.suggested_vehicle_type,
                estimated_price_min = excluded.estimated_price_min,
                estimated_price_max = excluded.estimated_price_max,
                quality_score = excluded.quality_score,
                analysis_notes = excluded.analysis_notes,
                sent_to_suppliers_at = excluded.sent_to_suppliers_at,
                updated_at = excluded.updated_at",
        )
        .bind(&enquiry.id.0)
        .bind(&enquiry.reference)
        .bind(&enquiry.customer_id.0)
        .bind(enquiry.status.as_str())
        .bind(enquiry.source.as_str())
        .bind(&enquiry.contact_name)
        .bind(&enquiry.contact_email)
        .bind(&enquiry.contact_phone)
        .bind(&enquiry.trip.pickup_location)
        .bind(&enquiry.trip.dropoff_location)
        .bind(encode_optional_timestamp(enquiry.trip.departure_at))
        .bind(encode_optional_timestamp(enquiry.trip.return_at))
        .bind(i64::from(enquiry.trip.passenger_count))
        .bind(enquiry.trip.trip_type.as_str())
        .bind(&enquiry.trip.special_requirements)
        .bind(enquiry.enrichment.complexity_score.map(i64::from))
        .bind(&enquiry.enrichment.suggested_vehicle_type)
        .bind(band.map(|band| band.min.to_string()))
        .bind(band.map(|band| band.max.to_string()))
        .bind(enquiry.enrichment.quality_score.map(i64::from))
        .bind(&enquiry.enrichment.analysis_notes)
        .bind(encode_optional_timestamp(enquiry.sent_to_suppliers_at))
        .bind(encode_timestamp(enquiry.created_at))
        .bind(encode_timestamp(enquiry.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_enrichment(
        &self,
        id: &EnquiryId,
        enrichment: &EnquiryEnrichment,
    ) -> Result<(), RepositoryError> {
        let band = enrichment.estimated_price;

        sqlx::query(
            "UPDATE enquiry SET
                complexity_score = ?,
                suggested_vehicle_type = ?,
                estimated_price_min = ?,
                estimated_price_max = ?,
                quality_score = ?,
                analysis_notes = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(enrichment.complexity_score.map(i64::from))
        .bind(&enrichment.suggested_vehicle_type)
        .bind(band.map(|band| band.min.to_string()))
        .bind(band.map(|band| band.max.to_string()))
        .bind(enrichment.quality_score.map(i64::from))
        .bind(&enrichment.analysis_notes)
        .bind(encode_timestamp(Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_status(
        &self,
        id: &EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
    ) -> Result<bool, RepositoryError> {
        let now = encode_timestamp(Utc::now());
        let sent_at = (next == EnquiryStatus::SentToSuppliers).then(|| now.clone());

        let result = sqlx::query(
            "UPDATE enquiry SET
                status = ?,
                sent_to_suppliers_at = COALESCE(?, sent_to_suppliers_at),
                updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(sent_at)
        .bind(&now)
        .bind(&id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_awaiting_bids(
        &self,
        sent_before: DateTime<Utc>,
    ) -> Result<Vec<Enquiry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENQUIRY_COLUMNS} FROM enquiry
             WHERE status = ? AND sent_to_suppliers_at IS NOT NULL AND sent_to_suppliers_at < ?
             ORDER BY sent_to_suppliers_at ASC"
        ))
        .bind(EnquiryStatus::SentToSuppliers.as_str())
        .bind(encode_timestamp(sent_before))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(enquiry_from_row).collect()
    }
}

fn enquiry_from_row(row: &SqliteRow) -> Result<Enquiry, RepositoryError> {
    let status: String = row.try_get("status")?;
    let source: String = row.try_get("source")?;
    let trip_type: String = row.try_get("trip_type")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let price_min = parse_optional_decimal("estimated_price_min", row.try_get("estimated_price_min")?)?;
    let price_max = parse_optional_decimal("estimated_price_max", row.try_get("estimated_price_max")?)?;
    let estimated_price = match (price_min, price_max) {
        (Some(min), Some(max)) => PriceBand::sanitized(min, max),
        _ => None,
    };

    Ok(Enquiry {
        id: EnquiryId(row.try_get("id")?),
        reference: row.try_get("reference")?,
        customer_id: CustomerId(row.try_get("customer_id")?),
        status: decode_enum("enquiry status", &status, EnquiryStatus::parse)?,
        source: decode_enum("enquiry source", &source, EnquirySource::parse)?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        contact_phone: row.try_get("contact_phone")?,
        trip: TripDetails {
            pickup_location: row.try_get("pickup_location")?,
            dropoff_location: row.try_get("dropoff_location")?,
            departure_at: parse_optional_timestamp("departure_at", row.try_get("departure_at")?)?,
            return_at: parse_optional_timestamp("return_at", row.try_get("return_at")?)?,
            passenger_count: to_u32("passenger_count", row.try_get("passenger_count")?)?,
            trip_type: decode_enum("trip type", &trip_type, TripType::parse)?,
            special_requirements: row.try_get("special_requirements")?,
        },
        enrichment: EnquiryEnrichment {
            complexity_score: small_score("complexity_score", row.try_get("complexity_score")?)?,
            suggested_vehicle_type: row.try_get("suggested_vehicle_type")?,
            estimated_price,
            quality_score: small_score("quality_score", row.try_get("quality_score")?)?,
            analysis_notes: row.try_get("analysis_notes")?,
        },
        sent_to_suppliers_at: parse_optional_timestamp(
            "sent_to_suppliers_at",
            row.try_get("sent_to_suppliers_at")?,
        )?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

fn small_score(field: &str, value: Option<i64>) -> Result<Option<u8>, RepositoryError> {
    value
        .map(|raw| {
            u8::try_from(raw)
                .map_err(|_| RepositoryError::Decode(format!("{field} out of range: {raw}")))
        })
        .transpose()
}
