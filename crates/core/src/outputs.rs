//! Typed structured outputs for each decision type.
//!
//! Each struct doubles as the JSON schema handed to the provider (via `schemars`) and the
//! shape the validated response is decoded into. Money coming back from a model is `f64`
//! and converted to `Decimal` at the point a pipeline commits it.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::{schema_for, JsonSchema};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::decision::DecisionType;

pub trait DecisionOutput:
    Serialize + DeserializeOwned + JsonSchema + Clone + Send + Sync + 'static
{
    const DECISION_TYPE: DecisionType;

    fn into_payload(self) -> DecisionPayload;

    fn output_schema() -> serde_json::Value {
        serde_json::to_value(schema_for!(Self)).unwrap_or(serde_json::Value::Null)
    }
}

/// Parsed output keyed by decision type, as stored on a decision log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision_type", content = "output", rename_all = "snake_case")]
pub enum DecisionPayload {
    EmailParse(ParsedEnquiry),
    EnquiryAnalysis(EnquiryAnalysis),
    SupplierSelection(SupplierSelection),
    BidEvaluation(BidEvaluation),
    MarkupCalculation(MarkupRecommendation),
    QuoteContent(QuoteContent),
    JobDocuments(JobDocuments),
    EmailPersonalization(PersonalizedEmail),
}

impl DecisionPayload {
    pub fn decision_type(&self) -> DecisionType {
        match self {
            Self::EmailParse(_) => DecisionType::EmailParse,
            Self::EnquiryAnalysis(_) => DecisionType::EnquiryAnalysis,
            Self::SupplierSelection(_) => DecisionType::SupplierSelection,
            Self::BidEvaluation(_) => DecisionType::BidEvaluation,
            Self::MarkupCalculation(_) => DecisionType::MarkupCalculation,
            Self::QuoteContent(_) => DecisionType::QuoteContent,
            Self::JobDocuments(_) => DecisionType::JobDocuments,
            Self::EmailPersonalization(_) => DecisionType::EmailPersonalization,
        }
    }
}

macro_rules! decision_output {
    ($output:ty, $decision_type:ident) => {
        impl DecisionOutput for $output {
            const DECISION_TYPE: DecisionType = DecisionType::$decision_type;

            fn into_payload(self) -> DecisionPayload {
                DecisionPayload::$decision_type(self)
            }
        }
    };
}

/// Enquiry fields extracted from a free-text inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParsedEnquiry {
    pub contact_name: String,
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    pub pickup_location: String,
    pub dropoff_location: String,
    /// ISO-8601 date or date-time
    #[serde(default)]
    pub departure_date: Option<String>,
    #[serde(default)]
    pub return_date: Option<String>,
    pub passenger_count: u32,
    /// one_way, return or multi_stop
    pub trip_type: String,
    #[serde(default)]
    pub special_requirements: Option<String>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnquiryAnalysis {
    /// 1 (simple transfer) to 10 (multi-day, multi-vehicle)
    pub complexity_score: u8,
    pub suggested_vehicle_type: String,
    pub estimated_price_min: f64,
    pub estimated_price_max: f64,
    /// 1-10 completeness of the customer's information
    pub quality_score: u8,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SupplierPick {
    pub supplier_id: String,
    pub score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SupplierSelection {
    /// Ranked best first
    pub selected_suppliers: Vec<SupplierPick>,
    /// How many of the ranked suppliers to invite
    pub recommended_count: u32,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BidRanking {
    pub bid_id: String,
    pub rank: u32,
    /// 0-100 fairness of the price against the market estimate
    pub fairness_score: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriceAnomaly {
    pub bid_id: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BidEvaluation {
    pub rankings: Vec<BidRanking>,
    pub recommended_bid_id: String,
    #[serde(default)]
    pub anomalies: Vec<PriceAnomaly>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

impl BidEvaluation {
    pub fn ranking_for(&self, bid_id: &str) -> Option<&BidRanking> {
        self.rankings.iter().find(|ranking| ranking.bid_id == bid_id)
    }

    pub fn is_anomalous(&self, bid_id: &str) -> bool {
        self.anomalies.iter().any(|anomaly| anomaly.bid_id == bid_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MarkupRecommendation {
    pub markup_percent: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// 0-1 estimated probability the customer accepts at this price
    #[serde(default)]
    pub acceptance_probability: Option<f64>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuoteContent {
    pub headline: String,
    pub body: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobDocuments {
    pub job_sheet: String,
    pub driver_briefing: String,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonalizedEmail {
    pub subject: String,
    pub html_body: String,
    #[serde(default, alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: Option<f64>,
}

decision_output!(ParsedEnquiry, EmailParse);
decision_output!(EnquiryAnalysis, EnquiryAnalysis);
decision_output!(SupplierSelection, SupplierSelection);
decision_output!(BidEvaluation, BidEvaluation);
decision_output!(MarkupRecommendation, MarkupCalculation);
decision_output!(QuoteContent, QuoteContent);
decision_output!(JobDocuments, JobDocuments);
decision_output!(PersonalizedEmail, EmailPersonalization);

/// Accepts RFC 3339 date-times or bare `YYYY-MM-DD` dates (taken as midnight UTC).
pub fn parse_loose_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
