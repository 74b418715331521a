use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enquiry::EnquiryId;
use super::record_id;
use crate::errors::DomainError;

record_id!(SupplierId);
record_id!(InvitationId);
record_id!(BidId);

/// Rating below which a supplier forces human review of any bid evaluation it takes part in.
pub const RELIABILITY_FLOOR: f64 = 3.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierOrganisation {
    pub id: SupplierId,
    pub name: String,
    pub contact_email: String,
    pub rating: Option<f64>,
    pub active: bool,
    pub fleet_size: u32,
    pub vehicle_types: Vec<String>,
    pub completed_jobs: u32,
    pub response_rate: Option<f64>,
}

impl SupplierOrganisation {
    /// Strictly below `floor`. Unrated suppliers are not considered a reliability risk.
    pub fn rated_below(&self, floor: f64) -> bool {
        self.rating.is_some_and(|rating| rating < floor)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    Pending,
    Submitted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "declined" => Some(Self::Declined),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidInvitation {
    pub id: InvitationId,
    pub enquiry_id: EnquiryId,
    pub supplier_id: SupplierId,
    pub access_token: String,
    pub status: InvitationStatus,
    pub deadline: DateTime<Utc>,
    pub last_reminded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BidInvitation {
    pub fn new(enquiry_id: EnquiryId, supplier_id: SupplierId, window: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: InvitationId::generate(),
            enquiry_id,
            supplier_id,
            access_token: generate_access_token(),
            status: InvitationStatus::Pending,
            deadline: now + window,
            last_reminded_at: None,
            created_at: now,
        }
    }

    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && at <= self.deadline
    }

    pub fn mark_submitted(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.is_open_at(at) {
            return Err(DomainError::InvalidTransition {
                record: "bid_invitation",
                from: self.status.as_str().to_string(),
                to: InvitationStatus::Submitted.as_str().to_string(),
            });
        }
        self.status = InvitationStatus::Submitted;
        Ok(())
    }
}

/// 48-character URL-safe token handed to a supplier in their invitation link.
pub fn generate_access_token() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    Submitted,
    Accepted,
    Rejected,
    Withdrawn,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }
}

/// AI assessment persisted onto a bid by the bid evaluation stage.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BidAssessment {
    pub fairness_score: Option<f64>,
    pub rank: Option<u32>,
    pub reasoning: Option<String>,
    pub anomaly: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierBid {
    pub id: BidId,
    pub enquiry_id: EnquiryId,
    pub invitation_id: InvitationId,
    pub supplier_id: SupplierId,
    pub total_price: Decimal,
    pub vehicle_description: String,
    pub notes: Option<String>,
    pub status: BidStatus,
    pub assessment: BidAssessment,
    pub submitted_at: DateTime<Utc>,
}

impl SupplierBid {
    pub fn new(
        invitation: &BidInvitation,
        total_price: Decimal,
        vehicle_description: impl Into<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: BidId::generate(),
            enquiry_id: invitation.enquiry_id.clone(),
            invitation_id: invitation.id.clone(),
            supplier_id: invitation.supplier_id.clone(),
            total_price,
            vehicle_description: vehicle_description.into(),
            notes,
            status: BidStatus::Submitted,
            assessment: BidAssessment::default(),
            submitted_at: Utc::now(),
        }
    }
}
