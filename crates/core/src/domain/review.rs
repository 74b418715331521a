use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::{DecisionLogId, DecisionType};
use super::record_id;
use crate::errors::DomainError;

record_id!(ReviewTaskId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewReason {
    LowConfidence,
    LowSupplierRating,
    AnomalousPricing,
    AiFailure,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::LowSupplierRating => "LOW_SUPPLIER_RATING",
            Self::AnomalousPricing => "ANOMALOUS_PRICING",
            Self::AiFailure => "AI_FAILURE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW_CONFIDENCE" => Some(Self::LowConfidence),
            "LOW_SUPPLIER_RATING" => Some(Self::LowSupplierRating),
            "ANOMALOUS_PRICING" => Some(Self::AnomalousPricing),
            "AI_FAILURE" => Some(Self::AiFailure),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Enquiry,
    Quote,
    Booking,
    InboundMessage,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enquiry => "enquiry",
            Self::Quote => "quote",
            Self::Booking => "booking",
            Self::InboundMessage => "inbound_message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "enquiry" => Some(Self::Enquiry),
            "quote" => Some(Self::Quote),
            "booking" => Some(Self::Booking),
            "inbound_message" => Some(Self::InboundMessage),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTarget {
    pub kind: TargetKind,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanReviewTask {
    pub id: ReviewTaskId,
    pub decision_type: DecisionType,
    pub target: ReviewTarget,
    pub decision_log_id: Option<DecisionLogId>,
    pub reason: ReviewReason,
    pub context: serde_json::Value,
    pub status: ReviewStatus,
    pub resolution_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl HumanReviewTask {
    pub fn open(
        decision_type: DecisionType,
        target: ReviewTarget,
        decision_log_id: Option<DecisionLogId>,
        reason: ReviewReason,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: ReviewTaskId::generate(),
            decision_type,
            target,
            decision_log_id,
            reason,
            context,
            status: ReviewStatus::Pending,
            resolution_note: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn resolve(&mut self, note: impl Into<String>) -> Result<(), DomainError> {
        self.close(ReviewStatus::Resolved, note.into())
    }

    pub fn dismiss(&mut self, note: impl Into<String>) -> Result<(), DomainError> {
        self.close(ReviewStatus::Dismissed, note.into())
    }

    fn close(&mut self, next: ReviewStatus, note: String) -> Result<(), DomainError> {
        if self.status != ReviewStatus::Pending {
            return Err(DomainError::InvalidTransition {
                record: "review_task",
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.resolution_note = Some(note);
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}
