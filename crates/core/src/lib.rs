pub mod config;
pub mod cost;
pub mod domain;
pub mod errors;
pub mod jobs;
pub mod outputs;
pub mod pricing;
pub mod thresholds;

pub use cost::{BudgetLevel, BudgetMode, BudgetStatus, ModelPriceTable, ModelRate};
pub use domain::booking::{Booking, BookingId, BookingStatus, BookingStatusHistory};
pub use domain::customer::{Customer, CustomerHistory, CustomerId};
pub use domain::decision::{
    CostRecord, DecisionAction, DecisionLogEntry, DecisionLogId, DecisionTargets, DecisionType,
    PipelineRunId, TokenUsage,
};
pub use domain::enquiry::{Enquiry, EnquiryId, EnquiryStatus, PriceBand};
pub use domain::job::{Job, JobCategory, JobId, JobKind, JobState, NewJob};
pub use domain::quote::{CustomerQuote, CustomerQuoteId, QuoteStatus};
pub use domain::review::{HumanReviewTask, ReviewReason, ReviewStatus, ReviewTaskId};
pub use domain::supplier::{BidInvitation, SupplierBid, SupplierId, SupplierOrganisation};
pub use errors::{ApplicationError, DomainError};
pub use jobs::{JobEngineConfig, JobError, JobFailurePolicy, JobStateEngine};
pub use outputs::{DecisionOutput, DecisionPayload};
pub use pricing::{compute_quote, MarkupBounds, QuoteBreakdown};
pub use thresholds::{ConfidenceVerdict, ThresholdTable};
