use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::customer::CustomerId;
use super::enquiry::EnquiryId;
use super::record_id;
use super::supplier::BidId;
use crate::errors::DomainError;
use crate::pricing::QuoteBreakdown;

record_id!(CustomerQuoteId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Draft,
    SentToCustomer,
    Accepted,
    Declined,
    Expired,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::SentToCustomer => "sent_to_customer",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent_to_customer" => Some(Self::SentToCustomer),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self, next),
            (QuoteStatus::Draft, QuoteStatus::SentToCustomer)
                | (QuoteStatus::SentToCustomer, QuoteStatus::Accepted)
                | (QuoteStatus::SentToCustomer, QuoteStatus::Declined)
                | (QuoteStatus::SentToCustomer, QuoteStatus::Expired)
        )
    }
}

/// AI-drafted customer-facing copy attached to a quote.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct QuoteCopy {
    pub headline: Option<String>,
    pub body: Option<String>,
    pub markup_reasoning: Option<String>,
    pub acceptance_probability: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerQuote {
    pub id: CustomerQuoteId,
    pub reference: String,
    pub enquiry_id: EnquiryId,
    pub customer_id: CustomerId,
    pub winning_bid_id: BidId,
    pub pricing: QuoteBreakdown,
    pub currency: String,
    pub copy: QuoteCopy,
    pub status: QuoteStatus,
    pub valid_until: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CustomerQuote {
    pub fn total(&self) -> Decimal {
        self.pricing.total
    }

    pub fn transition_to(&mut self, next: QuoteStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                record: "customer_quote",
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        if next == QuoteStatus::SentToCustomer {
            self.sent_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }
}
