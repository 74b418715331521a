use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use coachdesk_core::domain::booking::{Booking, BookingId, BookingStatus, BookingStatusHistory};
use coachdesk_core::domain::customer::{Customer, CustomerHistory, CustomerId};
use coachdesk_core::domain::decision::{
    CostRecord, DecisionLogEntry, DecisionLogId, DecisionType, PipelineRunId,
};
use coachdesk_core::domain::enquiry::{Enquiry, EnquiryEnrichment, EnquiryId, EnquiryStatus};
use coachdesk_core::domain::job::{Job, JobCategory, JobId, JobState};
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteStatus};
use coachdesk_core::domain::review::{HumanReviewTask, ReviewTaskId};
use coachdesk_core::domain::supplier::{
    BidId, BidInvitation, InvitationId, SupplierBid, SupplierId, SupplierOrganisation,
};

use crate::DbPool;

pub(crate) mod codec;
pub mod booking;
pub mod cost;
pub mod customer;
pub mod decision_log;
pub mod enquiry;
pub mod job_queue;
pub mod memory;
pub mod quote;
pub mod review;
pub mod sequence;
pub mod settings;
pub mod supplier;

pub use booking::SqlBookingRepository;
pub use cost::SqlCostRepository;
pub use customer::SqlCustomerRepository;
pub use decision_log::SqlDecisionLogRepository;
pub use enquiry::SqlEnquiryRepository;
pub use job_queue::SqlJobQueueRepository;
pub use memory::InMemoryStore;
pub use quote::SqlCustomerQuoteRepository;
pub use review::SqlReviewTaskRepository;
pub use sequence::SqlSequenceRepository;
pub use settings::SqlSettingsRepository;
pub use supplier::{SqlBidInvitationRepository, SqlSupplierBidRepository, SqlSupplierRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError>;
    /// Lookup by normalized (trimmed, lowercase) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError>;
    async fn save(&self, customer: Customer) -> Result<(), RepositoryError>;
    async fn history(&self, id: &CustomerId) -> Result<CustomerHistory, RepositoryError>;
}

#[async_trait]
pub trait EnquiryRepository: Send + Sync {
    async fn find_by_id(&self, id: &EnquiryId) -> Result<Option<Enquiry>, RepositoryError>;
    async fn save(&self, enquiry: Enquiry) -> Result<(), RepositoryError>;
    /// Writes AI enrichment without touching the status column.
    async fn update_enrichment(
        &self,
        id: &EnquiryId,
        enrichment: &EnquiryEnrichment,
    ) -> Result<(), RepositoryError>;
    /// Compare-and-set status update. Returns `false` when the row was not in `expected`.
    async fn advance_status(
        &self,
        id: &EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
    ) -> Result<bool, RepositoryError>;
    /// Enquiries still `SENT_TO_SUPPLIERS` that were sent out before `sent_before`.
    async fn list_awaiting_bids(
        &self,
        sent_before: DateTime<Utc>,
    ) -> Result<Vec<Enquiry>, RepositoryError>;
}

#[async_trait]
pub trait SupplierRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &SupplierId,
    ) -> Result<Option<SupplierOrganisation>, RepositoryError>;
    async fn save(&self, supplier: SupplierOrganisation) -> Result<(), RepositoryError>;
    async fn list_active(&self) -> Result<Vec<SupplierOrganisation>, RepositoryError>;
}

#[async_trait]
pub trait BidInvitationRepository: Send + Sync {
    async fn find_by_id(&self, id: &InvitationId)
        -> Result<Option<BidInvitation>, RepositoryError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<BidInvitation>, RepositoryError>;
    async fn save(&self, invitation: BidInvitation) -> Result<(), RepositoryError>;
    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<BidInvitation>, RepositoryError>;
    async fn count_pending(&self, enquiry_id: &EnquiryId) -> Result<u32, RepositoryError>;
    /// Bulk-expires pending invitations whose deadline passed. Returns the distinct
    /// enquiries that lost at least one pending invitation.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<EnquiryId>, RepositoryError>;
    /// Pending -> submitted, only while the deadline has not passed.
    async fn mark_submitted(
        &self,
        id: &InvitationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    async fn mark_reminded(&self, id: &InvitationId, at: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SupplierBidRepository: Send + Sync {
    async fn find_by_id(&self, id: &BidId) -> Result<Option<SupplierBid>, RepositoryError>;
    async fn save(&self, bid: SupplierBid) -> Result<(), RepositoryError>;
    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<SupplierBid>, RepositoryError>;
}

#[async_trait]
pub trait CustomerQuoteRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &CustomerQuoteId,
    ) -> Result<Option<CustomerQuote>, RepositoryError>;
    async fn find_latest_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Option<CustomerQuote>, RepositoryError>;
    async fn save(&self, quote: CustomerQuote) -> Result<(), RepositoryError>;
    /// Compare-and-set status update; stamps `sent_at` when moving to `SENT_TO_CUSTOMER`.
    async fn advance_status(
        &self,
        id: &CustomerQuoteId,
        expected: QuoteStatus,
        next: QuoteStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    /// Bulk-expires sent quotes past `valid_until`. Returns the number of rows changed.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    async fn find_by_quote(
        &self,
        quote_id: &CustomerQuoteId,
    ) -> Result<Option<Booking>, RepositoryError>;
    async fn save(&self, booking: Booking) -> Result<(), RepositoryError>;
    async fn append_history(&self, entry: BookingStatusHistory) -> Result<(), RepositoryError>;
    async fn list_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingStatusHistory>, RepositoryError>;
    /// Completed bookings whose `completed_at` falls in `[from, until)`.
    async fn list_completed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError>;
    async fn count_by_status(&self, status: BookingStatus) -> Result<u64, RepositoryError>;
}

/// Append-only audit trail: entries are never updated or deleted.
#[async_trait]
pub trait DecisionLogRepository: Send + Sync {
    async fn append(&self, entry: DecisionLogEntry) -> Result<DecisionLogId, RepositoryError>;
    async fn find_by_id(
        &self,
        id: &DecisionLogId,
    ) -> Result<Option<DecisionLogEntry>, RepositoryError>;
    async fn list_for_run(
        &self,
        run_id: &PipelineRunId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError>;
    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError>;
}

/// Per-decision-type spend for one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpendLine {
    pub decision_type: DecisionType,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: Decimal,
}

#[async_trait]
pub trait CostRepository: Send + Sync {
    async fn record(&self, record: CostRecord) -> Result<(), RepositoryError>;
    /// Additive aggregate over the day's rows for one provider.
    async fn daily_spend(&self, provider: &str, day: NaiveDate) -> Result<Decimal, RepositoryError>;
    async fn daily_breakdown(&self, day: NaiveDate) -> Result<Vec<SpendLine>, RepositoryError>;
}

#[async_trait]
pub trait ReviewTaskRepository: Send + Sync {
    async fn find_by_id(&self, id: &ReviewTaskId)
        -> Result<Option<HumanReviewTask>, RepositoryError>;
    async fn save(&self, task: HumanReviewTask) -> Result<(), RepositoryError>;
    async fn list_pending(&self, limit: u32) -> Result<Vec<HumanReviewTask>, RepositoryError>;
    async fn list_for_target(&self, target_id: &str)
        -> Result<Vec<HumanReviewTask>, RepositoryError>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Atomically increments and returns the counter; the first call returns 1.
    async fn next_value(&self, name: &str) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError>;
}

#[async_trait]
pub trait JobQueueRepository: Send + Sync {
    /// Inserts a job. Returns `false` when another job already holds the dedupe key.
    async fn enqueue(&self, job: Job) -> Result<bool, RepositoryError>;
    /// Atomically claims the oldest available job of `category`.
    async fn claim_next(
        &self,
        category: JobCategory,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError>;
    async fn save(&self, job: Job) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError>;
    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Job>, RepositoryError>;
    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError>;
    /// Returns running jobs claimed before `claimed_before` to the retryable pool.
    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Every repository behind a trait object, so pipelines run unchanged on SQLite or in memory.
#[derive(Clone)]
pub struct Repositories {
    pub customers: Arc<dyn CustomerRepository>,
    pub enquiries: Arc<dyn EnquiryRepository>,
    pub suppliers: Arc<dyn SupplierRepository>,
    pub invitations: Arc<dyn BidInvitationRepository>,
    pub bids: Arc<dyn SupplierBidRepository>,
    pub quotes: Arc<dyn CustomerQuoteRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub decisions: Arc<dyn DecisionLogRepository>,
    pub costs: Arc<dyn CostRepository>,
    pub reviews: Arc<dyn ReviewTaskRepository>,
    pub sequences: Arc<dyn SequenceRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub jobs: Arc<dyn JobQueueRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            customers: Arc::new(SqlCustomerRepository::new(pool.clone())),
            enquiries: Arc::new(SqlEnquiryRepository::new(pool.clone())),
            suppliers: Arc::new(SqlSupplierRepository::new(pool.clone())),
            invitations: Arc::new(SqlBidInvitationRepository::new(pool.clone())),
            bids: Arc::new(SqlSupplierBidRepository::new(pool.clone())),
            quotes: Arc::new(SqlCustomerQuoteRepository::new(pool.clone())),
            bookings: Arc::new(SqlBookingRepository::new(pool.clone())),
            decisions: Arc::new(SqlDecisionLogRepository::new(pool.clone())),
            costs: Arc::new(SqlCostRepository::new(pool.clone())),
            reviews: Arc::new(SqlReviewTaskRepository::new(pool.clone())),
            sequences: Arc::new(SqlSequenceRepository::new(pool.clone())),
            settings: Arc::new(SqlSettingsRepository::new(pool.clone())),
            jobs: Arc::new(SqlJobQueueRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::default()))
    }

    pub fn from_store(store: Arc<InMemoryStore>) -> Self {
        Self {
            customers: store.clone(),
            enquiries: store.clone(),
            suppliers: store.clone(),
            invitations: store.clone(),
            bids: store.clone(),
            quotes: store.clone(),
            bookings: store.clone(),
            decisions: store.clone(),
            costs: store.clone(),
            reviews: store.clone(),
            sequences: store.clone(),
            settings: store.clone(),
            jobs: store,
        }
    }
}
