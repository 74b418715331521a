use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::record_id;

record_id!(CustomerId);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: Option<String>) -> Self {
        Self {
            id: CustomerId::generate(),
            name: name.into(),
            email: normalize_email(&email.into()),
            phone,
            created_at: Utc::now(),
        }
    }
}

/// Prior behaviour used to inform markup pricing.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerHistory {
    pub prior_booking_count: u32,
    pub quotes_sent: u32,
    pub quotes_accepted: u32,
    pub average_spend: Option<Decimal>,
}

impl CustomerHistory {
    /// Share of sent quotes the customer accepted, as a 0-1 ratio.
    pub fn acceptance_rate(&self) -> Option<f64> {
        if self.quotes_sent == 0 {
            return None;
        }
        Some(f64::from(self.quotes_accepted) / f64::from(self.quotes_sent))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
