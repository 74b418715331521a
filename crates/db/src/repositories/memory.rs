use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use coachdesk_core::domain::booking::{Booking, BookingId, BookingStatus, BookingStatusHistory};
use coachdesk_core::domain::customer::{normalize_email, Customer, CustomerHistory, CustomerId};
use coachdesk_core::domain::decision::{
    CostRecord, DecisionLogEntry, DecisionLogId, DecisionType, PipelineRunId,
};
use coachdesk_core::domain::enquiry::{Enquiry, EnquiryEnrichment, EnquiryId, EnquiryStatus};
use coachdesk_core::domain::job::{Job, JobCategory, JobId, JobState};
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteStatus};
use coachdesk_core::domain::review::{HumanReviewTask, ReviewStatus, ReviewTaskId};
use coachdesk_core::domain::supplier::{
    BidId, BidInvitation, InvitationId, InvitationStatus, SupplierBid, SupplierId,
    SupplierOrganisation,
};

use super::customer::average;
use super::{
    BidInvitationRepository, BookingRepository, CostRepository, CustomerQuoteRepository,
    CustomerRepository, DecisionLogRepository, EnquiryRepository, JobQueueRepository,
    RepositoryError, ReviewTaskRepository, SequenceRepository, SettingsRepository, SpendLine,
    SupplierBidRepository, SupplierRepository,
};

#[derive(Default)]
struct Tables {
    customers: HashMap<String, Customer>,
    enquiries: HashMap<String, Enquiry>,
    suppliers: HashMap<String, SupplierOrganisation>,
    invitations: HashMap<String, BidInvitation>,
    bids: HashMap<String, SupplierBid>,
    quotes: HashMap<String, CustomerQuote>,
    bookings: HashMap<String, Booking>,
    booking_history: Vec<BookingStatusHistory>,
    decisions: Vec<DecisionLogEntry>,
    costs: Vec<CostRecord>,
    reviews: HashMap<String, HumanReviewTask>,
    sequences: HashMap<String, u64>,
    settings: HashMap<String, String>,
    jobs: Vec<Job>,
}

/// Process-local store implementing every repository trait, for tests and dry runs.
/// A single lock makes each trait call atomic, matching the row-level guarantees of the
/// SQL store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

#[async_trait]
impl CustomerRepository for InMemoryStore {
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.tables.read().await.customers.get(&id.0).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, RepositoryError> {
        let email = normalize_email(email);
        let tables = self.tables.read().await;
        Ok(tables.customers.values().find(|customer| customer.email == email).cloned())
    }

    async fn save(&self, mut customer: Customer) -> Result<(), RepositoryError> {
        customer.email = normalize_email(&customer.email);
        let mut tables = self.tables.write().await;
        tables.customers.insert(customer.id.0.clone(), customer);
        Ok(())
    }

    async fn history(&self, id: &CustomerId) -> Result<CustomerHistory, RepositoryError> {
        let tables = self.tables.read().await;
        let sent: Vec<&CustomerQuote> = tables
            .quotes
            .values()
            .filter(|quote| quote.customer_id == *id && quote.status != QuoteStatus::Draft)
            .collect();
        let totals: Vec<Decimal> = tables
            .bookings
            .values()
            .filter(|booking| {
                booking.customer_id == *id && booking.status != BookingStatus::Cancelled
            })
            .map(|booking| booking.total)
            .collect();

        Ok(CustomerHistory {
            prior_booking_count: totals.len() as u32,
            quotes_sent: sent.len() as u32,
            quotes_accepted: sent
                .iter()
                .filter(|quote| quote.status == QuoteStatus::Accepted)
                .count() as u32,
            average_spend: average(&totals),
        })
    }
}

#[async_trait]
impl EnquiryRepository for InMemoryStore {
    async fn find_by_id(&self, id: &EnquiryId) -> Result<Option<Enquiry>, RepositoryError> {
        Ok(self.tables.read().await.enquiries.get(&id.0).cloned())
    }

    async fn save(&self, enquiry: Enquiry) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.enquiries.insert(enquiry.id.0.clone(), enquiry);
        Ok(())
    }

    async fn update_enrichment(
        &self,
        id: &EnquiryId,
        enrichment: &EnquiryEnrichment,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(enquiry) = tables.enquiries.get_mut(&id.0) {
            enquiry.enrichment = enrichment.clone();
            enquiry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn advance_status(
        &self,
        id: &EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(enquiry) = tables.enquiries.get_mut(&id.0) else {
            return Ok(false);
        };
        if enquiry.status != expected {
            return Ok(false);
        }

        let now = Utc::now();
        enquiry.status = next;
        enquiry.updated_at = now;
        if next == EnquiryStatus::SentToSuppliers {
            enquiry.sent_to_suppliers_at = Some(now);
        }
        Ok(true)
    }

    async fn list_awaiting_bids(
        &self,
        sent_before: DateTime<Utc>,
    ) -> Result<Vec<Enquiry>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut enquiries: Vec<Enquiry> = tables
            .enquiries
            .values()
            .filter(|enquiry| {
                enquiry.status == EnquiryStatus::SentToSuppliers
                    && enquiry.sent_to_suppliers_at.is_some_and(|sent| sent < sent_before)
            })
            .cloned()
            .collect();
        enquiries.sort_by_key(|enquiry| enquiry.sent_to_suppliers_at);
        Ok(enquiries)
    }
}

#[async_trait]
impl SupplierRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &SupplierId,
    ) -> Result<Option<SupplierOrganisation>, RepositoryError> {
        Ok(self.tables.read().await.suppliers.get(&id.0).cloned())
    }

    async fn save(&self, supplier: SupplierOrganisation) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.suppliers.insert(supplier.id.0.clone(), supplier);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SupplierOrganisation>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut suppliers: Vec<SupplierOrganisation> =
            tables.suppliers.values().filter(|supplier| supplier.active).cloned().collect();
        suppliers.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(suppliers)
    }
}

#[async_trait]
impl BidInvitationRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &InvitationId,
    ) -> Result<Option<BidInvitation>, RepositoryError> {
        Ok(self.tables.read().await.invitations.get(&id.0).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<BidInvitation>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.invitations.values().find(|invitation| invitation.access_token == token).cloned())
    }

    async fn save(&self, invitation: BidInvitation) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.invitations.insert(invitation.id.0.clone(), invitation);
        Ok(())
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<BidInvitation>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut invitations: Vec<BidInvitation> = tables
            .invitations
            .values()
            .filter(|invitation| invitation.enquiry_id == *enquiry_id)
            .cloned()
            .collect();
        invitations.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(invitations)
    }

    async fn count_pending(&self, enquiry_id: &EnquiryId) -> Result<u32, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .invitations
            .values()
            .filter(|invitation| {
                invitation.enquiry_id == *enquiry_id
                    && invitation.status == InvitationStatus::Pending
            })
            .count() as u32)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<EnquiryId>, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut affected = BTreeSet::new();
        for invitation in tables.invitations.values_mut() {
            if invitation.status == InvitationStatus::Pending && invitation.deadline < now {
                invitation.status = InvitationStatus::Expired;
                affected.insert(invitation.enquiry_id.clone());
            }
        }
        Ok(affected.into_iter().collect())
    }

    async fn mark_submitted(
        &self,
        id: &InvitationId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.invitations.get_mut(&id.0) {
            Some(invitation) => Ok(invitation.mark_submitted(at).is_ok()),
            None => Ok(false),
        }
    }

    async fn mark_reminded(
        &self,
        id: &InvitationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(invitation) = tables.invitations.get_mut(&id.0) {
            invitation.last_reminded_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl SupplierBidRepository for InMemoryStore {
    async fn find_by_id(&self, id: &BidId) -> Result<Option<SupplierBid>, RepositoryError> {
        Ok(self.tables.read().await.bids.get(&id.0).cloned())
    }

    async fn save(&self, bid: SupplierBid) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.bids.insert(bid.id.0.clone(), bid);
        Ok(())
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<SupplierBid>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut bids: Vec<SupplierBid> =
            tables.bids.values().filter(|bid| bid.enquiry_id == *enquiry_id).cloned().collect();
        bids.sort_by(|left, right| {
            left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(bids)
    }
}

#[async_trait]
impl CustomerQuoteRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &CustomerQuoteId,
    ) -> Result<Option<CustomerQuote>, RepositoryError> {
        Ok(self.tables.read().await.quotes.get(&id.0).cloned())
    }

    async fn find_latest_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Option<CustomerQuote>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .quotes
            .values()
            .filter(|quote| quote.enquiry_id == *enquiry_id)
            .max_by(|left, right| {
                left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
            })
            .cloned())
    }

    async fn save(&self, quote: CustomerQuote) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.quotes.insert(quote.id.0.clone(), quote);
        Ok(())
    }

    async fn advance_status(
        &self,
        id: &CustomerQuoteId,
        expected: QuoteStatus,
        next: QuoteStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let Some(quote) = tables.quotes.get_mut(&id.0) else {
            return Ok(false);
        };
        if quote.status != expected {
            return Ok(false);
        }

        quote.status = next;
        if next == QuoteStatus::SentToCustomer {
            quote.sent_at = Some(at);
        }
        Ok(true)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let mut expired = 0;
        for quote in tables.quotes.values_mut() {
            if quote.status == QuoteStatus::SentToCustomer && quote.valid_until < now {
                quote.status = QuoteStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.tables.read().await.bookings.get(&id.0).cloned())
    }

    async fn find_by_quote(
        &self,
        quote_id: &CustomerQuoteId,
    ) -> Result<Option<Booking>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.bookings.values().find(|booking| booking.quote_id == *quote_id).cloned())
    }

    async fn save(&self, booking: Booking) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.bookings.insert(booking.id.0.clone(), booking);
        Ok(())
    }

    async fn append_history(&self, entry: BookingStatusHistory) -> Result<(), RepositoryError> {
        self.tables.write().await.booking_history.push(entry);
        Ok(())
    }

    async fn list_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingStatusHistory>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .booking_history
            .iter()
            .filter(|entry| entry.booking_id == *booking_id)
            .cloned()
            .collect())
    }

    async fn list_completed_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|booking| {
                booking.status == BookingStatus::Completed
                    && booking.completed_at.is_some_and(|at| at >= from && at < until)
            })
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| booking.completed_at);
        Ok(bookings)
    }

    async fn count_by_status(&self, status: BookingStatus) -> Result<u64, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.bookings.values().filter(|booking| booking.status == status).count() as u64)
    }
}

#[async_trait]
impl DecisionLogRepository for InMemoryStore {
    async fn append(&self, entry: DecisionLogEntry) -> Result<DecisionLogId, RepositoryError> {
        let id = entry.id.clone();
        self.tables.write().await.decisions.push(entry);
        Ok(id)
    }

    async fn find_by_id(
        &self,
        id: &DecisionLogId,
    ) -> Result<Option<DecisionLogEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.decisions.iter().find(|entry| entry.id == *id).cloned())
    }

    async fn list_for_run(
        &self,
        run_id: &PipelineRunId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .decisions
            .iter()
            .filter(|entry| entry.pipeline_run_id == *run_id)
            .cloned()
            .collect())
    }

    async fn list_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Vec<DecisionLogEntry>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .decisions
            .iter()
            .filter(|entry| entry.targets.enquiry_id.as_ref() == Some(enquiry_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CostRepository for InMemoryStore {
    async fn record(&self, record: CostRecord) -> Result<(), RepositoryError> {
        self.tables.write().await.costs.push(record);
        Ok(())
    }

    async fn daily_spend(&self, provider: &str, day: NaiveDate) -> Result<Decimal, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .costs
            .iter()
            .filter(|record| record.provider == provider && record.day == day)
            .map(|record| record.cost)
            .sum())
    }

    async fn daily_breakdown(&self, day: NaiveDate) -> Result<Vec<SpendLine>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut lines: Vec<SpendLine> = Vec::new();
        let mut types: Vec<DecisionType> = tables
            .costs
            .iter()
            .filter(|record| record.day == day)
            .map(|record| record.decision_type)
            .collect();
        types.sort_by_key(|decision_type| decision_type.as_str());
        types.dedup();

        for decision_type in types {
            let records = tables
                .costs
                .iter()
                .filter(|record| record.day == day && record.decision_type == decision_type);
            let mut line = SpendLine {
                decision_type,
                calls: 0,
                prompt_tokens: 0,
                completion_tokens: 0,
                cost: Decimal::ZERO,
            };
            for record in records {
                line.calls += 1;
                line.prompt_tokens += u64::from(record.usage.prompt_tokens);
                line.completion_tokens += u64::from(record.usage.completion_tokens);
                line.cost += record.cost;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

#[async_trait]
impl ReviewTaskRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: &ReviewTaskId,
    ) -> Result<Option<HumanReviewTask>, RepositoryError> {
        Ok(self.tables.read().await.reviews.get(&id.0).cloned())
    }

    async fn save(&self, task: HumanReviewTask) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.reviews.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<HumanReviewTask>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut pending: Vec<HumanReviewTask> = tables
            .reviews
            .values()
            .filter(|task| task.status == ReviewStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|task| task.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn list_for_target(
        &self,
        target_id: &str,
    ) -> Result<Vec<HumanReviewTask>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<HumanReviewTask> =
            tables.reviews.values().filter(|task| task.target.id == target_id).cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }
}

#[async_trait]
impl SequenceRepository for InMemoryStore {
    async fn next_value(&self, name: &str) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let value = tables.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[async_trait]
impl SettingsRepository for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.tables.read().await.settings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), RepositoryError> {
        self.tables.write().await.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut settings: Vec<(String, String)> =
            tables.settings.iter().map(|(key, value)| (key.clone(), value.clone())).collect();
        settings.sort();
        Ok(settings)
    }
}

#[async_trait]
impl JobQueueRepository for InMemoryStore {
    async fn enqueue(&self, job: Job) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.jobs.iter().any(|existing| {
            existing.id == job.id
                || (job.dedupe_key.is_some() && existing.dedupe_key == job.dedupe_key)
        });
        if duplicate {
            return Ok(false);
        }
        tables.jobs.push(job);
        Ok(true)
    }

    async fn claim_next(
        &self,
        category: JobCategory,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError> {
        let mut tables = self.tables.write().await;
        let candidate = tables
            .jobs
            .iter_mut()
            .filter(|job| {
                job.category == category && job.state.is_claimable() && job.available_at <= now
            })
            .min_by(|left, right| {
                left.available_at
                    .cmp(&right.available_at)
                    .then_with(|| left.created_at.cmp(&right.created_at))
            });

        Ok(candidate.map(|job| {
            job.state = JobState::Running;
            job.claimed_by = Some(worker_id.to_string());
            job.claimed_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn save(&self, job: Job) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.jobs.iter_mut().find(|existing| existing.id == job.id) {
            *existing = job;
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.iter().find(|job| job.id == *id).cloned())
    }

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Job>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.iter().find(|job| job.dedupe_key.as_deref() == Some(key)).cloned())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.iter().filter(|job| job.state == state).cloned().collect())
    }

    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut released = 0;
        for job in tables.jobs.iter_mut() {
            if job.state == JobState::Running
                && job.claimed_at.is_some_and(|claimed_at| claimed_at < claimed_before)
            {
                job.state = JobState::RetryableFailed;
                job.claimed_by = None;
                job.claimed_at = None;
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}
