use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::booking::BookingId;
use super::enquiry::EnquiryId;
use super::quote::CustomerQuoteId;
use super::record_id;
use crate::outputs::DecisionPayload;

record_id!(DecisionLogId);
record_id!(PipelineRunId);
record_id!(CostRecordId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    EmailParse,
    EnquiryAnalysis,
    SupplierSelection,
    BidEvaluation,
    MarkupCalculation,
    QuoteContent,
    JobDocuments,
    EmailPersonalization,
}

impl DecisionType {
    pub const ALL: [DecisionType; 8] = [
        Self::EmailParse,
        Self::EnquiryAnalysis,
        Self::SupplierSelection,
        Self::BidEvaluation,
        Self::MarkupCalculation,
        Self::QuoteContent,
        Self::JobDocuments,
        Self::EmailPersonalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailParse => "email_parse",
            Self::EnquiryAnalysis => "enquiry_analysis",
            Self::SupplierSelection => "supplier_selection",
            Self::BidEvaluation => "bid_evaluation",
            Self::MarkupCalculation => "markup_calculation",
            Self::QuoteContent => "quote_content",
            Self::JobDocuments => "job_documents",
            Self::EmailPersonalization => "email_personalization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == normalized)
    }

    /// Types whose stage opens a review task when confidence falls below the threshold.
    /// The rest commit their output regardless.
    pub fn escalates_on_low_confidence(&self) -> bool {
        matches!(self, Self::EmailParse | Self::SupplierSelection | Self::BidEvaluation)
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    AutoExecuted,
    EscalatedToHuman,
    Overridden,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoExecuted => "AUTO_EXECUTED",
            Self::EscalatedToHuman => "ESCALATED_TO_HUMAN",
            Self::Overridden => "OVERRIDDEN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AUTO_EXECUTED" => Some(Self::AutoExecuted),
            "ESCALATED_TO_HUMAN" => Some(Self::EscalatedToHuman),
            "OVERRIDDEN" => Some(Self::Overridden),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Business records a decision is about. The executor only references them.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionTargets {
    pub enquiry_id: Option<EnquiryId>,
    pub quote_id: Option<CustomerQuoteId>,
    pub booking_id: Option<BookingId>,
}

impl DecisionTargets {
    pub fn enquiry(id: EnquiryId) -> Self {
        Self { enquiry_id: Some(id), ..Self::default() }
    }

    pub fn quote(enquiry_id: EnquiryId, quote_id: CustomerQuoteId) -> Self {
        Self { enquiry_id: Some(enquiry_id), quote_id: Some(quote_id), booking_id: None }
    }

    pub fn booking(enquiry_id: EnquiryId, booking_id: BookingId) -> Self {
        Self { enquiry_id: Some(enquiry_id), quote_id: None, booking_id: Some(booking_id) }
    }
}

/// Immutable audit row. One per terminal executor attempt, plus one per human override.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: DecisionLogId,
    pub decision_type: DecisionType,
    pub pipeline_run_id: PipelineRunId,
    pub provider: String,
    pub model: String,
    pub prompt: serde_json::Value,
    pub raw_response: Option<serde_json::Value>,
    pub parsed_output: Option<DecisionPayload>,
    pub confidence_score: f64,
    pub action: DecisionAction,
    pub escalation_reason: Option<String>,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub estimated_cost: Decimal,
    pub targets: DecisionTargets,
    pub overrides_entry_id: Option<DecisionLogId>,
    pub created_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    /// Builds the appended entry recording a human override of `original`.
    pub fn override_of(
        original: &DecisionLogEntry,
        replacement: Option<DecisionPayload>,
        reviewer_note: impl Into<String>,
    ) -> Self {
        Self {
            id: DecisionLogId::generate(),
            decision_type: original.decision_type,
            pipeline_run_id: original.pipeline_run_id.clone(),
            provider: "human".to_string(),
            model: "reviewer".to_string(),
            prompt: original.prompt.clone(),
            raw_response: None,
            parsed_output: replacement,
            confidence_score: 1.0,
            action: DecisionAction::Overridden,
            escalation_reason: Some(reviewer_note.into()),
            usage: TokenUsage::default(),
            latency_ms: 0,
            estimated_cost: Decimal::ZERO,
            targets: original.targets.clone(),
            overrides_entry_id: Some(original.id.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Billing row written once per successful provider call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: CostRecordId,
    pub day: NaiveDate,
    pub decision_type: DecisionType,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: Decimal,
    pub decision_log_id: Option<DecisionLogId>,
    pub created_at: DateTime<Utc>,
}
