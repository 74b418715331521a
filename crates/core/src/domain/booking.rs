use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::customer::CustomerId;
use super::enquiry::EnquiryId;
use super::quote::CustomerQuoteId;
use super::record_id;
use super::supplier::{BidId, SupplierId};
use crate::errors::DomainError;

record_id!(BookingId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    SupplierAssigned,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::SupplierAssigned => "supplier_assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Some(Self::Confirmed),
            "supplier_assigned" => Some(Self::SupplierAssigned),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        match (self, next) {
            (Confirmed, SupplierAssigned)
            | (SupplierAssigned, InProgress)
            | (InProgress, Completed) => true,
            (Completed | Cancelled, _) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

/// Vehicle and driver allocated by the supplier for the job.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssignmentDetails {
    pub vehicle_description: Option<String>,
    pub vehicle_registration: Option<String>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub reference: String,
    pub quote_id: CustomerQuoteId,
    pub enquiry_id: EnquiryId,
    pub customer_id: CustomerId,
    pub supplier_id: SupplierId,
    pub bid_id: BidId,
    pub total: Decimal,
    pub status: BookingStatus,
    pub assignment: AssignmentDetails,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingStatusHistory {
    pub booking_id: BookingId,
    pub from_status: Option<BookingStatus>,
    pub to_status: BookingStatus,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl Booking {
    /// Applies a status change and returns the history entry to persist with it.
    pub fn transition_to(
        &mut self,
        next: BookingStatus,
        note: Option<String>,
    ) -> Result<BookingStatusHistory, DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                record: "booking",
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let changed_at = Utc::now();
        let entry = BookingStatusHistory {
            booking_id: self.id.clone(),
            from_status: Some(self.status),
            to_status: next,
            note,
            changed_at,
        };
        self.status = next;
        if next == BookingStatus::Completed {
            self.completed_at = Some(changed_at);
        }
        Ok(entry)
    }

    pub fn initial_history(&self) -> BookingStatusHistory {
        BookingStatusHistory {
            booking_id: self.id.clone(),
            from_status: None,
            to_status: self.status,
            note: Some("booking created from accepted quote".to_string()),
            changed_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn booking() -> Booking {
        Booking {
            id: BookingId::from("bkg-1"),
            reference: "BKG-2026-00001".to_string(),
            quote_id: CustomerQuoteId::from("quo-1"),
            enquiry_id: EnquiryId::from("enq-1"),
            customer_id: CustomerId::from("cus-1"),
            supplier_id: SupplierId::from("sup-1"),
            bid_id: BidId::from("bid-1"),
            total: Decimal::new(145800, 2),
            status: BookingStatus::Confirmed,
            assignment: AssignmentDetails::default(),
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transition_produces_history_entry() {
        let mut booking = booking();
        let entry = booking
            .transition_to(BookingStatus::SupplierAssigned, Some("documents sent".to_string()))
            .expect("confirmed -> supplier assigned");

        assert_eq!(entry.from_status, Some(BookingStatus::Confirmed));
        assert_eq!(entry.to_status, BookingStatus::SupplierAssigned);
        assert_eq!(booking.status, BookingStatus::SupplierAssigned);
    }

    #[test]
    fn completion_stamps_completed_at() {
        let mut booking = booking();
        booking.transition_to(BookingStatus::SupplierAssigned, None).expect("assign");
        booking.transition_to(BookingStatus::InProgress, None).expect("start");
        booking.transition_to(BookingStatus::Completed, None).expect("complete");
        assert!(booking.completed_at.is_some());
    }

    #[test]
    fn cancelled_is_absorbing_and_completed_cannot_be_cancelled() {
        assert!(BookingStatus::InProgress.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Cancelled));
        assert!(!BookingStatus::Confirmed.can_transition_to(BookingStatus::InProgress));
    }
}
