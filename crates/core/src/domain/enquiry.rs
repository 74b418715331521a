use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::customer::CustomerId;
use super::record_id;
use crate::errors::DomainError;

record_id!(EnquiryId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnquiryStatus {
    Submitted,
    UnderReview,
    SentToSuppliers,
    QuotesReceived,
    QuoteSent,
    Accepted,
    Expired,
    Rejected,
}

impl EnquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::SentToSuppliers => "sent_to_suppliers",
            Self::QuotesReceived => "quotes_received",
            Self::QuoteSent => "quote_sent",
            Self::Accepted => "accepted",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "under_review" => Some(Self::UnderReview),
            "sent_to_suppliers" => Some(Self::SentToSuppliers),
            "quotes_received" => Some(Self::QuotesReceived),
            "quote_sent" => Some(Self::QuoteSent),
            "accepted" => Some(Self::Accepted),
            "expired" => Some(Self::Expired),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Expired | Self::Rejected)
    }

    pub fn can_transition_to(&self, next: EnquiryStatus) -> bool {
        use EnquiryStatus::*;

        matches!(
            (self, next),
            (Submitted, UnderReview)
                | (UnderReview, SentToSuppliers)
                | (SentToSuppliers, QuotesReceived)
                | (QuotesReceived, QuoteSent)
                | (QuoteSent, Accepted)
        ) || (!self.is_terminal() && matches!(next, Expired | Rejected))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnquirySource {
    Web,
    Email,
}

impl EnquirySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Email => "email",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Some(Self::Web),
            "email" => Some(Self::Email),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    Return,
    MultiStop,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneWay => "one_way",
            Self::Return => "return",
            Self::MultiStop => "multi_stop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "one_way" | "single" => Some(Self::OneWay),
            "return" | "round_trip" => Some(Self::Return),
            "multi_stop" => Some(Self::MultiStop),
            _ => None,
        }
    }
}

/// Estimated market price band produced by enquiry analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Decimal,
    pub max: Decimal,
}

impl PriceBand {
    /// Returns `None` for inverted or non-positive bands so downstream stages never
    /// reason against a nonsensical estimate.
    pub fn sanitized(min: Decimal, max: Decimal) -> Option<Self> {
        if min <= Decimal::ZERO || max <= Decimal::ZERO || max < min {
            return None;
        }
        Some(Self { min, max })
    }

    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && amount <= self.max
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDetails {
    pub pickup_location: String,
    pub dropoff_location: String,
    pub departure_at: Option<DateTime<Utc>>,
    pub return_at: Option<DateTime<Utc>>,
    pub passenger_count: u32,
    pub trip_type: TripType,
    pub special_requirements: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnquiryEnrichment {
    pub complexity_score: Option<u8>,
    pub suggested_vehicle_type: Option<String>,
    pub estimated_price: Option<PriceBand>,
    pub quality_score: Option<u8>,
    pub analysis_notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enquiry {
    pub id: EnquiryId,
    pub reference: String,
    pub customer_id: CustomerId,
    pub status: EnquiryStatus,
    pub source: EnquirySource,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub trip: TripDetails,
    pub enrichment: EnquiryEnrichment,
    pub sent_to_suppliers_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Enquiry {
    pub fn transition_to(&mut self, next: EnquiryStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                record: "enquiry",
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        self.status = next;
        self.updated_at = Utc::now();
        if next == EnquiryStatus::SentToSuppliers {
            self.sent_to_suppliers_at = Some(self.updated_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{EnquiryStatus, PriceBand, TripType};

    #[test]
    fn lifecycle_advances_one_step_at_a_time() {
        use EnquiryStatus::*;

        let path = [Submitted, UnderReview, SentToSuppliers, QuotesReceived, QuoteSent, Accepted];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }

        assert!(!Submitted.can_transition_to(SentToSuppliers));
        assert!(!QuotesReceived.can_transition_to(UnderReview));
    }

    #[test]
    fn absorbing_branches_only_from_open_states() {
        assert!(EnquiryStatus::SentToSuppliers.can_transition_to(EnquiryStatus::Expired));
        assert!(EnquiryStatus::UnderReview.can_transition_to(EnquiryStatus::Rejected));
        assert!(!EnquiryStatus::Accepted.can_transition_to(EnquiryStatus::Expired));
        assert!(!EnquiryStatus::Expired.can_transition_to(EnquiryStatus::Rejected));
    }

    #[test]
    fn storage_encoding_is_stable() {
        for status in [
            EnquiryStatus::Submitted,
            EnquiryStatus::UnderReview,
            EnquiryStatus::SentToSuppliers,
            EnquiryStatus::QuotesReceived,
            EnquiryStatus::QuoteSent,
            EnquiryStatus::Accepted,
            EnquiryStatus::Expired,
            EnquiryStatus::Rejected,
        ] {
            assert_eq!(EnquiryStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn inverted_price_band_is_discarded() {
        assert!(PriceBand::sanitized(Decimal::new(1000, 0), Decimal::new(800, 0)).is_none());
        assert!(PriceBand::sanitized(Decimal::ZERO, Decimal::new(800, 0)).is_none());

        let band = PriceBand::sanitized(Decimal::new(800, 0), Decimal::new(1000, 0))
            .expect("valid band");
        assert!(band.contains(Decimal::new(900, 0)));
        assert!(!band.contains(Decimal::new(1200, 0)));
    }

    #[test]
    fn trip_type_accepts_loose_spellings() {
        assert_eq!(TripType::parse("Round trip"), Some(TripType::Return));
        assert_eq!(TripType::parse("one-way"), Some(TripType::OneWay));
        assert_eq!(TripType::parse("hovercraft"), None);
    }
}
