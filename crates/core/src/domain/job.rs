use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::booking::BookingId;
use super::enquiry::{EnquiryId, EnquiryStatus};
use super::quote::CustomerQuoteId;
use super::record_id;

record_id!(JobId);

/// Worker pool a job is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    Pipeline,
    Notification,
    Document,
}

impl JobCategory {
    pub const ALL: [JobCategory; 3] = [Self::Pipeline, Self::Notification, Self::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Notification => "notification",
            Self::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pipeline" => Some(Self::Pipeline),
            "notification" => Some(Self::Notification),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    EmailParseOrAnalyze,
    BidEvaluation,
    QuoteGeneration,
    JobConfirmation,
    SendEmail,
    GenerateJobSheet,
    GenerateDriverBriefing,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailParseOrAnalyze => "email-parse-or-analyze",
            Self::BidEvaluation => "bid-evaluation",
            Self::QuoteGeneration => "quote-generation",
            Self::JobConfirmation => "job-confirmation",
            Self::SendEmail => "send-email",
            Self::GenerateJobSheet => "generate-job-sheet",
            Self::GenerateDriverBriefing => "generate-driver-briefing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "email-parse-or-analyze" => Some(Self::EmailParseOrAnalyze),
            "bid-evaluation" => Some(Self::BidEvaluation),
            "quote-generation" => Some(Self::QuoteGeneration),
            "job-confirmation" => Some(Self::JobConfirmation),
            "send-email" => Some(Self::SendEmail),
            "generate-job-sheet" => Some(Self::GenerateJobSheet),
            "generate-driver-briefing" => Some(Self::GenerateDriverBriefing),
            _ => None,
        }
    }

    pub fn category(&self) -> JobCategory {
        match self {
            Self::EmailParseOrAnalyze
            | Self::BidEvaluation
            | Self::QuoteGeneration
            | Self::JobConfirmation => JobCategory::Pipeline,
            Self::SendEmail => JobCategory::Notification,
            Self::GenerateJobSheet | Self::GenerateDriverBriefing => JobCategory::Document,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    RetryableFailed,
    FailedTerminal,
    Completed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::RetryableFailed => "retryable_failed",
            Self::FailedTerminal => "failed_terminal",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "retryable_failed" => Some(Self::RetryableFailed),
            "failed_terminal" => Some(Self::FailedTerminal),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Queued | Self::RetryableFailed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub category: JobCategory,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
    pub state: JobState,
    pub retry_count: u32,
    pub max_retries: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Enqueue request. Fire-and-forget for the caller; a repeated `dedupe_key` is ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        Self { kind, payload, dedupe_key: None }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn intake_message(message: InboundMessage) -> Self {
        Self::new(
            JobKind::EmailParseOrAnalyze,
            IntakePayload { enquiry_id: None, message: Some(message) },
        )
    }

    pub fn intake_enquiry(enquiry_id: EnquiryId) -> Self {
        let dedupe = format!("intake:{enquiry_id}");
        Self::new(
            JobKind::EmailParseOrAnalyze,
            IntakePayload { enquiry_id: Some(enquiry_id), message: None },
        )
        .with_dedupe_key(dedupe)
    }

    /// Keyed on the stage's pre-state, so a run that found the enquiry elsewhere does not
    /// hold the key once the enquiry reaches that state.
    pub fn bid_evaluation(enquiry_id: EnquiryId) -> Self {
        let dedupe =
            format!("bid-evaluation:{enquiry_id}:{}", EnquiryStatus::SentToSuppliers.as_str());
        Self::new(JobKind::BidEvaluation, EnquiryPayload { enquiry_id }).with_dedupe_key(dedupe)
    }

    pub fn quote_generation(enquiry_id: EnquiryId) -> Self {
        let dedupe =
            format!("quote-generation:{enquiry_id}:{}", EnquiryStatus::QuotesReceived.as_str());
        Self::new(JobKind::QuoteGeneration, EnquiryPayload { enquiry_id }).with_dedupe_key(dedupe)
    }

    pub fn job_confirmation(quote_id: CustomerQuoteId) -> Self {
        let dedupe = format!("job-confirmation:{quote_id}");
        Self::new(JobKind::JobConfirmation, QuotePayload { quote_id }).with_dedupe_key(dedupe)
    }

    pub fn send_email(email: SendEmailPayload) -> Self {
        Self::new(JobKind::SendEmail, email)
    }

    pub fn document(kind: JobKind, document: DocumentPayload) -> Self {
        Self::new(kind, document)
    }
}

/// Raw inbound message handed to intake when no enquiry exists yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub subject: Option<String>,
    pub body: String,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakePayload {
    pub enquiry_id: Option<EnquiryId>,
    pub message: Option<InboundMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnquiryPayload {
    pub enquiry_id: EnquiryId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePayload {
    pub quote_id: CustomerQuoteId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub booking_id: BookingId,
    pub content: String,
}
