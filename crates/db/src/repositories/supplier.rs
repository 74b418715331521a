use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use coachdesk_core::domain::enquiry::EnquiryId;
use coachdesk_core::domain::supplier::{
    BidAssessment, BidId, BidInvitation, BidStatus, InvitationId, InvitationStatus, SupplierBid,
    SupplierId, SupplierOrganisation,
};

use super::codec::{
    decode_enum, encode_json, encode_optional_timestamp, encode_timestamp, parse_decimal,
    parse_json, parse_optional_timestamp, parse_timestamp, to_u32,
};
use super::{
    BidInvitationRepository, RepositoryError, SupplierBidRepository, SupplierRepository,
};
use crate::DbPool;

const SUPPLIER_COLUMNS: &str = "id, name, contact_email, rating, active, fleet_size,
    vehicle_types_json, completed_jobs, response_rate";

const INVITATION_COLUMNS: &str =
    "id, enquiry_id, supplier_id, access_token, status, deadline, last_reminded_at, created_at";

const BID_COLUMNS: &str = "id, enquiry_id, invitation_id, supplier_id, total_price,
    vehicle_description, notes, status, fairness_score, ai_rank, ai_reasoning, anomaly,
    submitted_at";

pub struct SqlSupplierRepository {
    pool: DbPool,
}

impl SqlSupplierRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SupplierRepository for SqlSupplierRepository {
    async fn find_by_id(
        &self,
        id: &SupplierId,
    ) -> Result<Option<SupplierOrganisation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM supplier_organisation WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(supplier_from_row).transpose()
    }

    async fn save(&self, supplier: SupplierOrganisation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO supplier_organisation (
                id, name, contact_email, rating, active, fleet_size, vehicle_types_json,
                completed_jobs, response_rate
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                contact_email = excluded.contact_email,
                rating = excluded.rating,
                active = excluded.active,
                fleet_size = excluded.fleet_size,
                vehicle_types_json = excluded.vehicle_types_json,
                completed_jobs = excluded.completed_jobs,
                response_rate = excluded.response_rate",
        )
        .bind(&supplier.id.0)
        .bind(&supplier.name)
        .bind(&supplier.contact_email)
        .bind(supplier.rating)
        .bind(supplier.active)
        .bind(i64::from(supplier.fleet_size))
        .bind(encode_json("vehicle_types", &supplier.vehicle_types)?)
        .bind(i64::from(supplier.completed_jobs))
        .bind(supplier.response_rate)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SupplierOrganisation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUPPLIER_COLUMNS} FROM supplier_organisation WHERE active = 1 ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(supplier_from_row).collect()
    }
}

pub struct SqlBidInvitationRepository {
    pool: DbPool,
}

impl SqlBidInvitationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BidInvitationRepository for SqlBidInvitationRepository {
    async fn find_by_id(
        &self,
        id: &InvitationId,
    ) -> Result<Option<BidInvitation>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {INVITATION_COLUMNS} FROM bid_invitation WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<BidInvitation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM bid_invitation WHERE access_token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn save(&self, invitation: BidInvitation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bid_invitation (
                id, enquiry_id, supplier_id, access_token, status, deadline, last_reminded_at,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                deadline = excluded.deadline,
                last_reminded_at = excluded.last_reminded_at",
        )
        .bind(&invitation.id.0)
        .bind(&invitation.enquiry_id.0)
        .bind(&invitation.supplier_id.0)
        .bind(&invitation.access_token)
        .bind(invitation.status.as_str())
        .bind(encode_timestamp(invitation.deadline))
        .bind(encode_optional_timestamp(invitation.last_reminded_at))
        .bind(encode_timestamp(invitation.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<BidInvitation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM bid_invitation
             WHERE enquiry_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&enquiry_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(invitation_from_row).collect()
    }

    async fn count_pending(&self, enquiry_id: &EnquiryId) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS pending FROM bid_invitation WHERE enquiry_id = ? AND status = ?",
        )
        .bind(&enquiry_id.0)
        .bind(InvitationStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("pending")?;

        to_u32("pending invitations", count)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<EnquiryId>, RepositoryError> {
        let rows = sqlx::query(
            "UPDATE bid_invitation SET status = ?
             WHERE status = ? AND deadline < ?
             RETURNING enquiry_id",
        )
        .bind(InvitationStatus::Expired.as_str())
        .bind(InvitationStatus::Pending.as_str())
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let enquiries = rows
            .iter()
            .map(|row| row.try_get::<String, _>("enquiry_id"))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(enquiries.into_iter().map(EnquiryId).collect())
    }

    async fn mark_submitted(
        &self,
        id: &InvitationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE bid_invitation SET status = ?
             WHERE id = ? AND status = ? AND deadline >= ?",
        )
        .bind(InvitationStatus::Submitted.as_str())
        .bind(&id.0)
        .bind(InvitationStatus::Pending.as_str())
        .bind(encode_timestamp(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_reminded(
        &self,
        id: &InvitationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE bid_invitation SET last_reminded_at = ? WHERE id = ?")
            .bind(encode_timestamp(at))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

pub struct SqlSupplierBidRepository {
    pool: DbPool,
}

impl SqlSupplierBidRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SupplierBidRepository for SqlSupplierBidRepository {
    async fn find_by_id(&self, id: &BidId) -> Result<Option<SupplierBid>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {BID_COLUMNS} FROM supplier_bid WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(bid_from_row).transpose()
    }

    async fn save(&self, bid: SupplierBid) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO supplier_bid (
                id, enquiry_id, invitation_id, supplier_id, total_price, vehicle_description,
                notes, status, fairness_score, ai_rank, ai_reasoning, anomaly, submitted_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                total_price = excluded.total_price,
                vehicle_description = excluded.vehicle_description,
                notes = excluded.notes,
                status = excluded.status,
                fairness_score = excluded.fairness_score,
                ai_rank = excluded.ai_rank,
                ai_reasoning = excluded.ai_reasoning,
                anomaly = excluded.anomaly",
        )
        .bind(&bid.id.0)
        .bind(&bid.enquiry_id.0)
        .bind(&bid.invitation_id.0)
        .bind(&bid.supplier_id.0)
        .bind(bid.total_price.to_string())
        .bind(&bid.vehicle_description)
        .bind(&bid.notes)
        .bind(bid.status.as_str())
        .bind(bid.assessment.fairness_score)
        .bind(bid.assessment.rank.map(i64::from))
        .bind(&bid.assessment.reasoning)
        .bind(bid.assessment.anomaly)
        .bind(encode_timestamp(bid.submitted_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<SupplierBid>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BID_COLUMNS} FROM supplier_bid
             WHERE enquiry_id = ?
             ORDER BY submitted_at ASC, id ASC"
        ))
        .bind(&enquiry_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(bid_from_row).collect()
    }
}

fn supplier_from_row(row: &SqliteRow) -> Result<SupplierOrganisation, RepositoryError> {
    let vehicle_types: String = row.try_get("vehicle_types_json")?;

    Ok(SupplierOrganisation {
        id: SupplierId(row.try_get("id")?),
        name: row.try_get("name")?,
        contact_email: row.try_get("contact_email")?,
        rating: row.try_get("rating")?,
        active: row.try_get("active")?,
        fleet_size: to_u32("fleet_size", row.try_get("fleet_size")?)?,
        vehicle_types: parse_json("vehicle_types", &vehicle_types)?,
        completed_jobs: to_u32("completed_jobs", row.try_get("completed_jobs")?)?,
        response_rate: row.try_get("response_rate")?,
    })
}

fn invitation_from_row(row: &SqliteRow) -> Result<BidInvitation, RepositoryError> {
    let status: String = row.try_get("status")?;
    let deadline: String = row.try_get("deadline")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(BidInvitation {
        id: InvitationId(row.try_get("id")?),
        enquiry_id: EnquiryId(row.try_get("enquiry_id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        access_token: row.try_get("access_token")?,
        status: decode_enum("invitation status", &status, InvitationStatus::parse)?,
        deadline: parse_timestamp("deadline", &deadline)?,
        last_reminded_at: parse_optional_timestamp(
            "last_reminded_at",
            row.try_get("last_reminded_at")?,
        )?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn bid_from_row(row: &SqliteRow) -> Result<SupplierBid, RepositoryError> {
    let status: String = row.try_get("status")?;
    let total_price: String = row.try_get("total_price")?;
    let submitted_at: String = row.try_get("submitted_at")?;
    let rank: Option<i64> = row.try_get("ai_rank")?;

    Ok(SupplierBid {
        id: BidId(row.try_get("id")?),
        enquiry_id: EnquiryId(row.try_get("enquiry_id")?),
        invitation_id: InvitationId(row.try_get("invitation_id")?),
        supplier_id: SupplierId(row.try_get("supplier_id")?),
        total_price: parse_decimal("total_price", &total_price)?,
        vehicle_description: row.try_get("vehicle_description")?,
        notes: row.try_get("notes")?,
        status: decode_enum("bid status", &status, BidStatus::parse)?,
        assessment: BidAssessment {
            fairness_score: row.try_get("fairness_score")?,
            rank: rank.map(|raw| to_u32("ai_rank", raw)).transpose()?,
            reasoning: row.try_get("ai_reasoning")?,
            anomaly: row.try_get("anomaly")?,
        },
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
    })
}
