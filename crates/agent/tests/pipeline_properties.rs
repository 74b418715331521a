use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use coachdesk_agent::executor::RetryPolicy;
use coachdesk_agent::llm::{InferenceProvider, ProviderError, ScriptedProvider};
use coachdesk_agent::pipelines::{
    bid_evaluation, bids, intake, job_confirmation, quote_generation, PipelineContext,
    PipelineError, StageOutcome,
};
use coachdesk_agent::reviews::ReviewDesk;
use coachdesk_agent::runtime::{FileDocumentSink, JobDispatcher, LoggingNotificationSink};
use coachdesk_agent::scheduler::{Scheduler, SweepKind};
use coachdesk_core::config::AppConfig;
use coachdesk_core::domain::booking::{AssignmentDetails, Booking, BookingId, BookingStatus};
use coachdesk_core::domain::customer::Customer;
use coachdesk_core::domain::decision::{DecisionAction, DecisionType};
use coachdesk_core::domain::enquiry::{
    Enquiry, EnquiryEnrichment, EnquiryId, EnquirySource, EnquiryStatus, PriceBand, TripDetails,
    TripType,
};
use coachdesk_core::domain::job::{InboundMessage, Job, JobCategory, JobId, JobKind, JobState};
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteStatus};
use coachdesk_core::domain::review::{ReviewReason, ReviewStatus, TargetKind};
use coachdesk_core::domain::supplier::{
    BidId, BidInvitation, BidStatus, InvitationStatus, SupplierBid, SupplierId,
    SupplierOrganisation,
};
use coachdesk_core::outputs::{
    BidEvaluation, DecisionPayload, EnquiryAnalysis, JobDocuments, MarkupRecommendation,
    ParsedEnquiry, PersonalizedEmail, QuoteContent, SupplierSelection,
};
use coachdesk_db::repositories::{
    CustomerQuoteRepository, EnquiryRepository, InMemoryStore, JobQueueRepository, Repositories,
    RepositoryError,
};

struct Harness {
    repos: Repositories,
    provider: Arc<ScriptedProvider>,
    ctx: Arc<PipelineContext>,
}

fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(Repositories::from_store(Arc::new(InMemoryStore::default())), provider)
}

fn harness_with(repos: Repositories, provider: ScriptedProvider) -> Harness {
    let provider = Arc::new(provider);
    let dyn_provider: Arc<dyn InferenceProvider> = provider.clone();
    let ctx = PipelineContext::with_retry_policy(
        repos.clone(),
        dyn_provider,
        &AppConfig::default(),
        RetryPolicy::immediate(2),
    )
    .expect("pipeline context");
    Harness { repos, provider, ctx: Arc::new(ctx) }
}

fn scripted() -> ScriptedProvider {
    ScriptedProvider::new("openai", "gpt-4o-mini")
}

fn email_reply() -> serde_json::Value {
    json!({"subject": "Your coach trip", "html_body": "<p>Details inside.</p>", "confidence_score": 0.9})
}

fn supplier(id: &str, rating: f64) -> SupplierOrganisation {
    SupplierOrganisation {
        id: SupplierId::from(id),
        name: format!("{id} Coaches"),
        contact_email: format!("bookings@{id}.example"),
        rating: Some(rating),
        active: true,
        fleet_size: 12,
        vehicle_types: vec!["49-seat coach".to_string()],
        completed_jobs: 40,
        response_rate: Some(0.85),
    }
}

async fn seed_enquiry(repos: &Repositories, status: EnquiryStatus) -> Enquiry {
    let customer = Customer::new("Ada Lovelace", "ada@example.com", None);
    repos.customers.save(customer.clone()).await.expect("save customer");

    let now = Utc::now();
    let enquiry = Enquiry {
        id: EnquiryId::generate(),
        reference: "ENQ-2026-0001".to_string(),
        customer_id: customer.id,
        status,
        source: EnquirySource::Web,
        contact_name: customer.name,
        contact_email: customer.email,
        contact_phone: None,
        trip: TripDetails {
            pickup_location: "Leeds".to_string(),
            dropoff_location: "York".to_string(),
            departure_at: Some(now + Duration::days(30)),
            return_at: None,
            passenger_count: 40,
            trip_type: TripType::OneWay,
            special_requirements: None,
        },
        enrichment: EnquiryEnrichment::default(),
        sent_to_suppliers_at: Some(now),
        created_at: now,
        updated_at: now,
    };
    repos.enquiries.save(enquiry.clone()).await.expect("save enquiry");
    enquiry
}

async fn seed_bid(
    repos: &Repositories,
    enquiry: &Enquiry,
    supplier: SupplierOrganisation,
    price: i64,
    status: BidStatus,
) -> SupplierBid {
    repos.suppliers.save(supplier.clone()).await.expect("save supplier");
    let mut invitation = BidInvitation::new(enquiry.id.clone(), supplier.id, Duration::hours(48));
    invitation.status = InvitationStatus::Submitted;
    repos.invitations.save(invitation.clone()).await.expect("save invitation");

    let mut bid = SupplierBid::new(&invitation, Decimal::new(price, 0), "49-seat coach", None);
    bid.status = status;
    repos.bids.save(bid.clone()).await.expect("save bid");
    bid
}

async fn queued_of_kind(repos: &Repositories, kind: JobKind) -> usize {
    repos
        .jobs
        .list_by_state(JobState::Queued)
        .await
        .expect("list jobs")
        .iter()
        .filter(|job| job.kind == kind)
        .count()
}

#[tokio::test]
async fn three_bids_award_the_recommended_one() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let a = seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.6), 900, BidStatus::Submitted).await;
    let b = seed_bid(&h.repos, &enquiry, supplier("sup-b", 4.1), 980, BidStatus::Submitted).await;
    let c = seed_bid(&h.repos, &enquiry, supplier("sup-c", 3.8), 1_150, BidStatus::Submitted).await;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [
            {"bid_id": a.id.as_str(), "rank": 1, "fairness_score": 88.0},
            {"bid_id": b.id.as_str(), "rank": 2, "fairness_score": 80.0},
            {"bid_id": c.id.as_str(), "rank": 3, "fairness_score": 61.0}
        ],
        "recommended_bid_id": a.id.as_str(),
        "confidence_score": 0.91
    }));

    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    assert_eq!(
        outcome,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::QuotesReceived }
    );

    let stored = h.repos.bids.list_for_enquiry(&enquiry.id).await.expect("bids");
    let status_of = |id: &str| stored.iter().find(|bid| bid.id.as_str() == id).map(|bid| bid.status);
    assert_eq!(status_of(a.id.as_str()), Some(BidStatus::Accepted));
    assert_eq!(status_of(b.id.as_str()), Some(BidStatus::Rejected));
    assert_eq!(status_of(c.id.as_str()), Some(BidStatus::Rejected));
    let ranked_third = stored.iter().find(|bid| bid.id == c.id).and_then(|bid| bid.assessment.rank);
    assert_eq!(ranked_third, Some(3));

    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 1);
}

#[tokio::test]
async fn low_rated_supplier_forces_review_despite_high_confidence() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let good = seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Submitted).await;
    let risky = seed_bid(&h.repos, &enquiry, supplier("sup-r", 2.4), 700, BidStatus::Submitted).await;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [
            {"bid_id": risky.id.as_str(), "rank": 1, "fairness_score": 92.0},
            {"bid_id": good.id.as_str(), "rank": 2, "fairness_score": 85.0}
        ],
        "recommended_bid_id": risky.id.as_str(),
        "confidence_score": 0.95
    }));

    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::LowSupplierRating);

    let task = h.repos.reviews.find_by_id(&review_task_id).await.expect("read").expect("task");
    assert_eq!(task.target.kind, TargetKind::Enquiry);
    assert_eq!(task.context["low_rated_suppliers"], json!(["sup-r"]));

    let stored = h.repos.bids.list_for_enquiry(&enquiry.id).await.expect("bids");
    assert!(stored.iter().all(|bid| bid.status == BidStatus::Submitted));
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 0);
}

#[tokio::test]
async fn markup_above_ceiling_is_clamped_before_pricing() {
    let provider = scripted()
        .respond::<MarkupRecommendation>(json!({"markup_percent": 40.0, "confidence_score": 0.85}))
        .respond::<QuoteContent>(json!({
            "headline": "Leeds to York",
            "body": "A 49-seat coach for your group.",
            "highlights": ["Professional driver"],
            "confidence_score": 0.9
        }))
        .respond::<PersonalizedEmail>(email_reply());
    let h = harness(provider);
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::QuotesReceived).await;
    seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Accepted).await;

    let outcome = quote_generation::run(&h.ctx, &enquiry.id).await.expect("quote");
    assert_eq!(
        outcome,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::QuoteSent }
    );

    let quote =
        h.repos.quotes.find_latest_for_enquiry(&enquiry.id).await.expect("read").expect("quote");
    assert_eq!(quote.status, QuoteStatus::SentToCustomer);
    assert_eq!(quote.pricing.markup_percent, Decimal::new(35, 0));
    assert_eq!(quote.pricing.markup_amount.to_string(), "315.00");
    assert_eq!(quote.pricing.subtotal.to_string(), "1215.00");
    assert_eq!(quote.pricing.tax_amount.to_string(), "243.00");
    assert_eq!(quote.total().to_string(), "1458.00");
    assert!(quote.reference.starts_with("QUO-"));

    let refreshed = h.repos.enquiries.find_by_id(&enquiry.id).await.expect("read").expect("enquiry");
    assert_eq!(refreshed.status, EnquiryStatus::QuoteSent);
    assert_eq!(queued_of_kind(&h.repos, JobKind::SendEmail).await, 1);
}

#[tokio::test]
async fn unsure_parse_goes_to_review_without_creating_anything() {
    let provider = scripted().respond::<ParsedEnquiry>(json!({
        "contact_name": "Ada",
        "contact_email": "ada@example.com",
        "pickup_location": "Leeds",
        "dropoff_location": "somewhere north",
        "passenger_count": 40,
        "trip_type": "one_way",
        "confidence_score": 0.55
    }));
    let h = harness(provider);
    let message = InboundMessage {
        from: "ada@example.com".to_string(),
        subject: Some("coach?".to_string()),
        body: "need a coach for about 40 of us, leeds to up north".to_string(),
        received_at: None,
    };

    let outcome = intake::from_message(&h.ctx, message).await.expect("intake");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::LowConfidence);

    let task = h.repos.reviews.find_by_id(&review_task_id).await.expect("read").expect("task");
    assert_eq!(task.target.kind, TargetKind::InboundMessage);
    assert_eq!(task.target.id, "ada@example.com");

    assert!(h.repos.customers.find_by_email("ada@example.com").await.expect("read").is_none());
    assert_eq!(h.provider.calls_for::<EnquiryAnalysis>(), 0);
    assert_eq!(h.provider.calls_for::<SupplierSelection>(), 0);
}

#[tokio::test]
async fn bid_timeout_sweep_enqueues_evaluation_once() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    for id in ["sup-a", "sup-b"] {
        let supplier = supplier(id, 4.0);
        h.repos.suppliers.save(supplier.clone()).await.expect("save supplier");
        let mut invitation = BidInvitation::new(enquiry.id.clone(), supplier.id, Duration::hours(48));
        invitation.deadline = Utc::now() - Duration::hours(1);
        h.repos.invitations.save(invitation).await.expect("save invitation");
    }

    let scheduler = Scheduler::new(h.ctx.clone());
    let first = scheduler.bid_timeout(Utc::now()).await.expect("first sweep");
    let second = scheduler.bid_timeout(Utc::now()).await.expect("second sweep");

    assert_eq!(first.enqueued, 1);
    assert_eq!(second.enqueued, 0);
    assert_eq!(queued_of_kind(&h.repos, JobKind::BidEvaluation).await, 1);
    assert_eq!(h.repos.invitations.count_pending(&enquiry.id).await.expect("count"), 0);
}

#[tokio::test]
async fn bid_submissions_are_validated_and_the_last_one_queues_evaluation() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let mut tokens = Vec::new();
    for id in ["sup-a", "sup-b"] {
        let supplier = supplier(id, 4.2);
        h.repos.suppliers.save(supplier.clone()).await.expect("save supplier");
        let invitation = BidInvitation::new(enquiry.id.clone(), supplier.id, Duration::hours(48));
        tokens.push(invitation.access_token.clone());
        h.repos.invitations.save(invitation).await.expect("save invitation");
    }

    let unknown = bids::record_bid_submission(&h.ctx, "nope", Decimal::new(900, 0), "coach", None).await;
    assert!(matches!(unknown, Err(PipelineError::NotFound { .. })));
    let free = bids::record_bid_submission(&h.ctx, &tokens[0], Decimal::ZERO, "coach", None).await;
    assert!(matches!(free, Err(PipelineError::InvalidInput(_))));

    let first = bids::record_bid_submission(
        &h.ctx,
        &tokens[0],
        Decimal::new(90_0499, 3),
        "49-seat coach",
        Some("  ".to_string()),
    )
    .await
    .expect("first bid");
    assert!(!first.evaluation_enqueued);
    let stored = h.repos.bids.find_by_id(&first.bid_id).await.expect("read").expect("bid");
    assert_eq!(stored.total_price.to_string(), "900.50");
    assert_eq!(stored.notes, None);

    let again = bids::record_bid_submission(&h.ctx, &tokens[0], Decimal::new(850, 0), "coach", None).await;
    assert!(matches!(again, Err(PipelineError::InvalidInput(_))));

    let last = bids::record_bid_submission(&h.ctx, &tokens[1], Decimal::new(980, 0), "57-seat coach", None)
        .await
        .expect("last bid");
    assert!(last.evaluation_enqueued);
    assert_eq!(queued_of_kind(&h.repos, JobKind::BidEvaluation).await, 1);
}

#[tokio::test]
async fn reviewer_override_is_appended_alongside_the_escalated_entry() {
    let provider = scripted().respond::<SupplierSelection>(json!({
        "selected_suppliers": [{"supplier_id": "sup-a", "score": 0.6}],
        "recommended_count": 1,
        "confidence_score": 0.4
    }));
    let h = harness(provider);
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::UnderReview).await;
    h.repos.suppliers.save(supplier("sup-a", 4.4)).await.expect("save supplier");

    let outcome = intake::from_enquiry(&h.ctx, &enquiry.id).await.expect("intake");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::LowConfidence);

    // A pending review parks the enquiry.
    let parked = intake::from_enquiry(&h.ctx, &enquiry.id).await.expect("intake");
    assert!(matches!(parked, StageOutcome::Skipped { .. }));

    let desk = ReviewDesk::from_repositories(&h.repos);
    let replacement = DecisionPayload::SupplierSelection(SupplierSelection {
        selected_suppliers: vec![],
        recommended_count: 1,
        reasoning: Some("invite sup-a directly".to_string()),
        confidence_score: None,
    });
    let (task, entry_id) = desk
        .override_decision(&review_task_id, Some(replacement), "known operator")
        .await
        .expect("override");
    assert_eq!(task.status, ReviewStatus::Resolved);

    let entries = h.repos.decisions.list_for_enquiry(&enquiry.id).await.expect("entries");
    let escalated = entries
        .iter()
        .find(|entry| entry.action == DecisionAction::EscalatedToHuman)
        .expect("escalated entry");
    let appended = h.repos.decisions.find_by_id(&entry_id).await.expect("read").expect("entry");
    assert_eq!(appended.action, DecisionAction::Overridden);
    assert_eq!(appended.overrides_entry_id.as_ref(), Some(&escalated.id));
    assert!(h.repos.reviews.list_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn enquiry_flows_from_inbound_email_to_assigned_booking() {
    let provider = scripted()
        .respond::<ParsedEnquiry>(json!({
            "contact_name": "Ada Lovelace",
            "contact_email": "Ada@Example.com",
            "pickup_location": "Leeds",
            "dropoff_location": "York",
            "departure_date": "2026-11-20T08:00:00Z",
            "passenger_count": 40,
            "trip_type": "one_way",
            "confidence_score": 0.92
        }))
        .respond::<EnquiryAnalysis>(json!({
            "complexity_score": 3,
            "suggested_vehicle_type": "49-seat coach",
            "estimated_price_min": 800.0,
            "estimated_price_max": 1100.0,
            "quality_score": 8,
            "confidence_score": 0.8
        }))
        .respond::<SupplierSelection>(json!({
            "selected_suppliers": [
                {"supplier_id": "sup-a", "score": 0.9},
                {"supplier_id": "sup-b", "score": 0.8}
            ],
            "recommended_count": 2,
            "confidence_score": 0.86
        }))
        .respond::<PersonalizedEmail>(email_reply())
        .respond::<MarkupRecommendation>(json!({"markup_percent": 25.0, "confidence_score": 0.8}))
        .respond::<QuoteContent>(json!({
            "headline": "Leeds to York",
            "body": "Your coach is ready to book.",
            "confidence_score": 0.9
        }))
        .respond::<JobDocuments>(json!({
            "job_sheet": "Pickup Leeds 08:00",
            "driver_briefing": "40 passengers, one way to York",
            "confidence_score": 0.9
        }));
    let h = harness(provider);
    h.repos.suppliers.save(supplier("sup-a", 4.7)).await.expect("save supplier");
    h.repos.suppliers.save(supplier("sup-b", 4.1)).await.expect("save supplier");

    let documents_dir = std::env::temp_dir().join(format!("coachdesk-flow-{}", EnquiryId::generate()));
    let dispatcher = JobDispatcher::new(
        h.ctx.clone(),
        Arc::new(LoggingNotificationSink),
        Arc::new(FileDocumentSink::new(&documents_dir)),
    );

    let message = InboundMessage {
        from: "ada@example.com".to_string(),
        subject: Some("Coach to York".to_string()),
        body: "Hi, we need a coach for 40 people from Leeds to York on 20 November.".to_string(),
        received_at: Some(Utc::now()),
    };
    let StageOutcome::Advanced { enquiry_id, status } =
        intake::from_message(&h.ctx, message).await.expect("intake")
    else {
        panic!("intake did not advance");
    };
    assert_eq!(status, EnquiryStatus::SentToSuppliers);

    let invitations = h.repos.invitations.list_for_enquiry(&enquiry_id).await.expect("invitations");
    assert_eq!(invitations.len(), 2);
    let mut submitted = Vec::new();
    for (invitation, price) in invitations.iter().zip([900, 980]) {
        let receipt = bids::record_bid_submission(
            &h.ctx,
            &invitation.access_token,
            Decimal::new(price, 0),
            "49-seat coach",
            None,
        )
        .await
        .expect("bid");
        submitted.push(receipt);
    }
    assert!(submitted[1].evaluation_enqueued);

    let winner = &submitted[0].bid_id;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [
            {"bid_id": winner.as_str(), "rank": 1, "fairness_score": 90.0},
            {"bid_id": submitted[1].bid_id.as_str(), "rank": 2, "fairness_score": 82.0}
        ],
        "recommended_bid_id": winner.as_str(),
        "confidence_score": 0.9
    }));

    // bid evaluation, then the quote it queues
    for _ in 0..2 {
        dispatcher.run_next(JobCategory::Pipeline, "pipeline-0").await.expect("run").expect("job");
    }
    let quote =
        h.repos.quotes.find_latest_for_enquiry(&enquiry_id).await.expect("read").expect("quote");
    assert_eq!(quote.status, QuoteStatus::SentToCustomer);
    assert_eq!(quote.total().to_string(), "1350.00");

    assert!(job_confirmation::accept_quote(&h.ctx, &quote.id).await.expect("accept"));
    assert!(!job_confirmation::accept_quote(&h.ctx, &quote.id).await.expect("accept twice"));
    dispatcher.run_next(JobCategory::Pipeline, "pipeline-0").await.expect("run").expect("job");
    assert!(dispatcher.run_next(JobCategory::Pipeline, "pipeline-0").await.expect("run").is_none());

    let booking = h.repos.bookings.find_by_quote(&quote.id).await.expect("read").expect("booking");
    assert_eq!(booking.status, BookingStatus::SupplierAssigned);
    assert_eq!(booking.total.to_string(), "1350.00");
    let history = h.repos.bookings.list_history(&booking.id).await.expect("history");
    assert_eq!(history.len(), 2);
    let enquiry = h.repos.enquiries.find_by_id(&enquiry_id).await.expect("read").expect("enquiry");
    assert_eq!(enquiry.status, EnquiryStatus::Accepted);

    let mut delivered = 0;
    while dispatcher.run_next(JobCategory::Notification, "mail-0").await.expect("run").is_some() {
        delivered += 1;
    }
    // two invitations, the quote, then supplier and customer confirmations
    assert_eq!(delivered, 5);

    let mut documents = 0;
    while dispatcher.run_next(JobCategory::Document, "docs-0").await.expect("run").is_some() {
        documents += 1;
    }
    assert_eq!(documents, 2);
    assert!(documents_dir.join(format!("{}-generate-job-sheet.txt", booking.id)).exists());

    assert!(h.repos.reviews.list_pending(10).await.expect("pending").is_empty());
    let _ = tokio::fs::remove_dir_all(&documents_dir).await;
}

/// Job table that reports a locked database on the first insert of one job kind.
struct LockedOnceJobs {
    store: Arc<InMemoryStore>,
    kind: JobKind,
    tripped: AtomicBool,
}

impl LockedOnceJobs {
    fn new(store: Arc<InMemoryStore>, kind: JobKind) -> Self {
        Self { store, kind, tripped: AtomicBool::new(false) }
    }
}

#[async_trait]
impl JobQueueRepository for LockedOnceJobs {
    async fn enqueue(&self, job: Job) -> Result<bool, RepositoryError> {
        if job.kind == self.kind && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Decode("database is locked".to_string()));
        }
        JobQueueRepository::enqueue(self.store.as_ref(), job).await
    }

    async fn claim_next(
        &self,
        category: JobCategory,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, RepositoryError> {
        JobQueueRepository::claim_next(self.store.as_ref(), category, worker_id, now).await
    }

    async fn save(&self, job: Job) -> Result<(), RepositoryError> {
        JobQueueRepository::save(self.store.as_ref(), job).await
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, RepositoryError> {
        JobQueueRepository::find_by_id(self.store.as_ref(), id).await
    }

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Job>, RepositoryError> {
        JobQueueRepository::find_by_dedupe_key(self.store.as_ref(), key).await
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>, RepositoryError> {
        JobQueueRepository::list_by_state(self.store.as_ref(), state).await
    }

    async fn release_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        JobQueueRepository::release_stale(self.store.as_ref(), claimed_before).await
    }
}

/// Enquiry table whose first status write into `next` fails.
struct LockedOnceEnquiries {
    store: Arc<InMemoryStore>,
    next: EnquiryStatus,
    tripped: AtomicBool,
}

#[async_trait]
impl EnquiryRepository for LockedOnceEnquiries {
    async fn find_by_id(&self, id: &EnquiryId) -> Result<Option<Enquiry>, RepositoryError> {
        EnquiryRepository::find_by_id(self.store.as_ref(), id).await
    }

    async fn save(&self, enquiry: Enquiry) -> Result<(), RepositoryError> {
        EnquiryRepository::save(self.store.as_ref(), enquiry).await
    }

    async fn update_enrichment(
        &self,
        id: &EnquiryId,
        enrichment: &EnquiryEnrichment,
    ) -> Result<(), RepositoryError> {
        EnquiryRepository::update_enrichment(self.store.as_ref(), id, enrichment).await
    }

    async fn advance_status(
        &self,
        id: &EnquiryId,
        expected: EnquiryStatus,
        next: EnquiryStatus,
    ) -> Result<bool, RepositoryError> {
        if next == self.next && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Decode("database is locked".to_string()));
        }
        EnquiryRepository::advance_status(self.store.as_ref(), id, expected, next).await
    }

    async fn list_awaiting_bids(
        &self,
        sent_before: DateTime<Utc>,
    ) -> Result<Vec<Enquiry>, RepositoryError> {
        EnquiryRepository::list_awaiting_bids(self.store.as_ref(), sent_before).await
    }
}

/// Quote table where a draft never moves to `SENT_TO_CUSTOMER`.
struct DraftOnlyQuotes {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl CustomerQuoteRepository for DraftOnlyQuotes {
    async fn find_by_id(&self, id: &CustomerQuoteId) -> Result<Option<CustomerQuote>, RepositoryError> {
        CustomerQuoteRepository::find_by_id(self.store.as_ref(), id).await
    }

    async fn find_latest_for_enquiry(
        &self,
        enquiry_id: &EnquiryId,
    ) -> Result<Option<CustomerQuote>, RepositoryError> {
        CustomerQuoteRepository::find_latest_for_enquiry(self.store.as_ref(), enquiry_id).await
    }

    async fn save(&self, quote: CustomerQuote) -> Result<(), RepositoryError> {
        CustomerQuoteRepository::save(self.store.as_ref(), quote).await
    }

    async fn advance_status(
        &self,
        id: &CustomerQuoteId,
        expected: QuoteStatus,
        next: QuoteStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if next == QuoteStatus::SentToCustomer {
            return Ok(false);
        }
        CustomerQuoteRepository::advance_status(self.store.as_ref(), id, expected, next, at).await
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        CustomerQuoteRepository::expire_overdue(self.store.as_ref(), now).await
    }
}

fn quoting_provider() -> ScriptedProvider {
    scripted()
        .respond::<MarkupRecommendation>(json!({"markup_percent": 25.0, "confidence_score": 0.85}))
        .respond::<QuoteContent>(json!({
            "headline": "Leeds to York",
            "body": "A 49-seat coach for your group.",
            "confidence_score": 0.9
        }))
        .respond::<PersonalizedEmail>(email_reply())
}

async fn open_invitation(
    repos: &Repositories,
    enquiry: &Enquiry,
    supplier: SupplierOrganisation,
    deadline: DateTime<Utc>,
) -> BidInvitation {
    repos.suppliers.save(supplier.clone()).await.expect("save supplier");
    let mut invitation = BidInvitation::new(enquiry.id.clone(), supplier.id, Duration::hours(48));
    invitation.deadline = deadline;
    repos.invitations.save(invitation.clone()).await.expect("save invitation");
    invitation
}

async fn enquiry_status(repos: &Repositories, id: &EnquiryId) -> EnquiryStatus {
    repos.enquiries.find_by_id(id).await.expect("read").expect("enquiry").status
}

#[tokio::test]
async fn failed_invitation_email_stores_nothing_and_bids_still_reach_evaluation() {
    let provider = scripted()
        .respond::<SupplierSelection>(json!({
            "selected_suppliers": [
                {"supplier_id": "sup-a", "score": 0.9},
                {"supplier_id": "sup-b", "score": 0.8}
            ],
            "recommended_count": 2,
            "confidence_score": 0.9
        }))
        .respond::<PersonalizedEmail>(email_reply())
        .fail::<PersonalizedEmail>(ProviderError::Timeout);
    let h = harness(provider);
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::UnderReview).await;
    h.repos.suppliers.save(supplier("sup-a", 4.6)).await.expect("save supplier");
    h.repos.suppliers.save(supplier("sup-b", 4.2)).await.expect("save supplier");

    let outcome = intake::from_enquiry(&h.ctx, &enquiry.id).await.expect("intake");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::AiFailure);
    assert!(h.repos.invitations.list_for_enquiry(&enquiry.id).await.expect("invitations").is_empty());
    assert_eq!(queued_of_kind(&h.repos, JobKind::SendEmail).await, 0);
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::UnderReview);

    ReviewDesk::from_repositories(&h.repos)
        .resolve(&review_task_id, "mail server is back")
        .await
        .expect("resolve");
    // one more timeout is absorbed by the executor retry, then the email is sticky
    h.provider.push_response::<PersonalizedEmail>(email_reply());

    let outcome = intake::from_enquiry(&h.ctx, &enquiry.id).await.expect("second intake");
    assert_eq!(
        outcome,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::SentToSuppliers }
    );
    let invitations = h.repos.invitations.list_for_enquiry(&enquiry.id).await.expect("invitations");
    assert_eq!(invitations.len(), 2);
    assert_eq!(queued_of_kind(&h.repos, JobKind::SendEmail).await, 2);

    let mut receipts = Vec::new();
    for (invitation, price) in invitations.iter().zip([900, 950]) {
        let receipt = bids::record_bid_submission(
            &h.ctx,
            &invitation.access_token,
            Decimal::new(price, 0),
            "49-seat coach",
            None,
        )
        .await
        .expect("bid");
        receipts.push(receipt);
    }
    assert!(!receipts[0].evaluation_enqueued);
    assert!(receipts[1].evaluation_enqueued);
    assert_eq!(queued_of_kind(&h.repos, JobKind::BidEvaluation).await, 1);
}

#[tokio::test]
async fn evaluation_waits_until_the_enquiry_is_out_to_suppliers() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::UnderReview).await;
    let open = open_invitation(&h.repos, &enquiry, supplier("sup-a", 4.4), Utc::now() + Duration::hours(24)).await;
    open_invitation(&h.repos, &enquiry, supplier("sup-b", 4.1), Utc::now() - Duration::hours(1)).await;

    let receipt =
        bids::record_bid_submission(&h.ctx, &open.access_token, Decimal::new(900, 0), "49-seat coach", None)
            .await
            .expect("bid");
    assert!(!receipt.evaluation_enqueued);

    let scheduler = Scheduler::new(h.ctx.clone());
    let held = scheduler.bid_timeout(Utc::now()).await.expect("sweep");
    assert_eq!(held.affected, 1);
    assert_eq!(held.enqueued, 0);
    assert_eq!(queued_of_kind(&h.repos, JobKind::BidEvaluation).await, 0);

    assert!(h
        .repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::UnderReview, EnquiryStatus::SentToSuppliers)
        .await
        .expect("advance"));
    open_invitation(&h.repos, &enquiry, supplier("sup-c", 4.0), Utc::now() - Duration::minutes(5)).await;

    let released = scheduler.bid_timeout(Utc::now()).await.expect("sweep");
    assert_eq!(released.enqueued, 1);
    assert_eq!(queued_of_kind(&h.repos, JobKind::BidEvaluation).await, 1);
}

#[tokio::test]
async fn redelivered_evaluation_queues_the_quote_it_failed_to_queue() {
    let store = Arc::new(InMemoryStore::default());
    let mut repos = Repositories::from_store(store.clone());
    repos.jobs = Arc::new(LockedOnceJobs::new(store, JobKind::QuoteGeneration));
    let h = harness_with(repos, scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let bid = seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Submitted).await;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [{"bid_id": bid.id.as_str(), "rank": 1, "fairness_score": 86.0}],
        "recommended_bid_id": bid.id.as_str(),
        "confidence_score": 0.9
    }));

    let first = bid_evaluation::run(&h.ctx, &enquiry.id).await;
    assert!(first.is_err(), "first delivery should surface the locked queue");
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::QuotesReceived);
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 0);

    let second = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("redelivery");
    assert_eq!(
        second,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::QuotesReceived }
    );
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 1);
    assert_eq!(h.provider.calls_for::<BidEvaluation>(), 1);
    let stored = h.repos.bids.find_by_id(&bid.id).await.expect("read").expect("bid");
    assert_eq!(stored.status, BidStatus::Accepted);
}

#[tokio::test]
async fn redelivered_quote_finishes_the_enquiry_without_sending_twice() {
    let store = Arc::new(InMemoryStore::default());
    let mut repos = Repositories::from_store(store.clone());
    repos.enquiries = Arc::new(LockedOnceEnquiries {
        store,
        next: EnquiryStatus::QuoteSent,
        tripped: AtomicBool::new(false),
    });
    let h = harness_with(repos, quoting_provider());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::QuotesReceived).await;
    seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Accepted).await;

    let first = quote_generation::run(&h.ctx, &enquiry.id).await;
    assert!(first.is_err(), "first delivery should surface the failed status write");
    let quote =
        h.repos.quotes.find_latest_for_enquiry(&enquiry.id).await.expect("read").expect("quote");
    assert_eq!(quote.status, QuoteStatus::SentToCustomer);
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::QuotesReceived);

    let second = quote_generation::run(&h.ctx, &enquiry.id).await.expect("redelivery");
    assert_eq!(
        second,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::QuoteSent }
    );
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::QuoteSent);
    assert_eq!(queued_of_kind(&h.repos, JobKind::SendEmail).await, 1);
    assert_eq!(h.provider.calls_for::<MarkupRecommendation>(), 1);
    assert_eq!(h.provider.calls_for::<PersonalizedEmail>(), 1);
}

#[tokio::test]
async fn quote_that_cannot_be_marked_sent_leaves_the_enquiry_in_place() {
    let store = Arc::new(InMemoryStore::default());
    let mut repos = Repositories::from_store(store.clone());
    repos.quotes = Arc::new(DraftOnlyQuotes { store });
    let h = harness_with(repos, quoting_provider());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::QuotesReceived).await;
    seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Accepted).await;

    let outcome = quote_generation::run(&h.ctx, &enquiry.id).await.expect("quote");
    assert!(matches!(outcome, StageOutcome::Skipped { .. }), "got {outcome:?}");
    let quote =
        h.repos.quotes.find_latest_for_enquiry(&enquiry.id).await.expect("read").expect("quote");
    assert_eq!(quote.status, QuoteStatus::Draft);
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::QuotesReceived);
}

#[tokio::test]
async fn low_confidence_markup_commits_and_is_logged_as_policy() {
    let provider = scripted()
        .respond::<MarkupRecommendation>(json!({"markup_percent": 20.0, "confidence_score": 0.3}))
        .respond::<QuoteContent>(json!({
            "headline": "Leeds to York",
            "body": "A 49-seat coach for your group.",
            "confidence_score": 0.9
        }))
        .respond::<PersonalizedEmail>(email_reply());
    let h = harness(provider);
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::QuotesReceived).await;
    seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Accepted).await;

    let outcome = quote_generation::run(&h.ctx, &enquiry.id).await.expect("quote");
    assert!(matches!(outcome, StageOutcome::Advanced { .. }), "got {outcome:?}");

    let entries = h.repos.decisions.list_for_enquiry(&enquiry.id).await.expect("entries");
    let markup = entries
        .iter()
        .find(|entry| entry.decision_type == DecisionType::MarkupCalculation)
        .expect("markup entry");
    assert_eq!(markup.action, DecisionAction::AutoExecuted);
    assert!(markup.escalation_reason.as_deref().unwrap_or_default().ends_with("committed by policy"));
    assert!(entries.iter().all(|entry| entry.action != DecisionAction::EscalatedToHuman));
    assert!(h.repos.reviews.list_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn evaluation_without_bids_reports_no_bids() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;

    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    assert_eq!(outcome, StageOutcome::NoBids { enquiry_id: enquiry.id.clone() });
    assert_eq!(enquiry_status(&h.repos, &enquiry.id).await, EnquiryStatus::SentToSuppliers);
    assert_eq!(h.provider.calls_for::<BidEvaluation>(), 0);
}

#[tokio::test]
async fn reported_price_anomaly_goes_to_review_and_stays_parked() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let fair = seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Submitted).await;
    let cheap = seed_bid(&h.repos, &enquiry, supplier("sup-b", 4.2), 420, BidStatus::Submitted).await;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [
            {"bid_id": fair.id.as_str(), "rank": 1, "fairness_score": 84.0},
            {"bid_id": cheap.id.as_str(), "rank": 2, "fairness_score": 40.0}
        ],
        "recommended_bid_id": fair.id.as_str(),
        "anomalies": [{"bid_id": cheap.id.as_str(), "description": "less than half the market band"}],
        "confidence_score": 0.9
    }));

    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::AnomalousPricing);
    let task = h.repos.reviews.find_by_id(&review_task_id).await.expect("read").expect("task");
    assert_eq!(task.context["reason_code"], "bid_pricing_anomaly");

    let stored = h.repos.bids.list_for_enquiry(&enquiry.id).await.expect("bids");
    assert!(stored.iter().all(|bid| bid.status == BidStatus::Submitted));
    let flagged = stored.iter().find(|bid| bid.id == cheap.id).expect("cheap bid");
    assert!(flagged.assessment.anomaly);
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 0);

    let again = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("redelivery");
    assert!(matches!(again, StageOutcome::Skipped { .. }), "got {again:?}");
    assert_eq!(h.provider.calls_for::<BidEvaluation>(), 1);
}

#[tokio::test]
async fn recommended_bid_that_was_never_submitted_is_an_ai_failure() {
    let h = harness(scripted());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    let bid = seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Submitted).await;
    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [{"bid_id": bid.id.as_str(), "rank": 1, "fairness_score": 80.0}],
        "recommended_bid_id": "bid-unknown",
        "confidence_score": 0.92
    }));

    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    let StageOutcome::Escalated { review_task_id, reason } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(reason, ReviewReason::AiFailure);
    let task = h.repos.reviews.find_by_id(&review_task_id).await.expect("read").expect("task");
    assert_eq!(task.context["recommended_bid_id"], "bid-unknown");
    assert_eq!(task.decision_type, DecisionType::BidEvaluation);

    let stored = h.repos.bids.find_by_id(&bid.id).await.expect("read").expect("bid");
    assert_eq!(stored.status, BidStatus::Submitted);
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 0);
}

#[tokio::test]
async fn single_bid_after_two_invitations_lapse_is_awarded() {
    let h = harness(scripted());
    let mut enquiry = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    enquiry.enrichment.estimated_price =
        Some(PriceBand { min: Decimal::new(800, 0), max: Decimal::new(1_000, 0) });
    h.repos.enquiries.save(enquiry.clone()).await.expect("save enquiry");

    let now = Utc::now();
    let bidder =
        open_invitation(&h.repos, &enquiry, supplier("sup-a", 4.5), now + Duration::hours(24)).await;
    for id in ["sup-b", "sup-c"] {
        open_invitation(&h.repos, &enquiry, supplier(id, 4.0), now - Duration::hours(2)).await;
    }

    let receipt = bids::record_bid_submission(
        &h.ctx,
        &bidder.access_token,
        Decimal::new(900, 0),
        "49-seat coach",
        None,
    )
    .await
    .expect("bid");
    assert!(!receipt.evaluation_enqueued, "two invitations are still pending");

    let sweep = Scheduler::new(h.ctx.clone()).bid_timeout(now).await.expect("sweep");
    assert_eq!(sweep.enqueued, 1);
    let invitations = h.repos.invitations.list_for_enquiry(&enquiry.id).await.expect("invitations");
    assert_eq!(invitations.iter().filter(|invitation| invitation.status == InvitationStatus::Expired).count(), 2);

    h.provider.push_response::<BidEvaluation>(json!({
        "rankings": [{"bid_id": receipt.bid_id.as_str(), "rank": 1, "fairness_score": 88.0}],
        "recommended_bid_id": receipt.bid_id.as_str(),
        "confidence_score": 0.85
    }));
    let outcome = bid_evaluation::run(&h.ctx, &enquiry.id).await.expect("evaluate");
    assert_eq!(
        outcome,
        StageOutcome::Advanced { enquiry_id: enquiry.id.clone(), status: EnquiryStatus::QuotesReceived }
    );

    let awarded = h.repos.bids.find_by_id(&receipt.bid_id).await.expect("read").expect("bid");
    assert_eq!(awarded.status, BidStatus::Accepted);
    assert_eq!(queued_of_kind(&h.repos, JobKind::QuoteGeneration).await, 1);
    let entries = h.repos.decisions.list_for_enquiry(&enquiry.id).await.expect("entries");
    let evaluation = entries
        .iter()
        .find(|entry| entry.decision_type == DecisionType::BidEvaluation)
        .expect("evaluation entry");
    assert_eq!(evaluation.action, DecisionAction::AutoExecuted);
    assert_eq!(evaluation.confidence_score, 0.85);
}

fn booking_for(
    customer: &Customer,
    status: BookingStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Booking {
    Booking {
        id: BookingId::generate(),
        reference: "BKG-2026-0001".to_string(),
        quote_id: CustomerQuoteId::from("quo-1"),
        enquiry_id: EnquiryId::generate(),
        customer_id: customer.id.clone(),
        supplier_id: SupplierId::from("sup-a"),
        bid_id: BidId::from("bid-1"),
        total: Decimal::new(1_350, 0),
        status,
        assignment: AssignmentDetails::default(),
        completed_at,
        created_at: Utc::now() - Duration::days(10),
    }
}

#[tokio::test]
async fn survey_sweep_mails_yesterdays_completed_bookings_once() {
    let h = harness(scripted());
    let customer = Customer::new("Grace Hopper", "grace@example.com", None);
    h.repos.customers.save(customer.clone()).await.expect("save customer");

    let now = Utc::now();
    let yesterday = booking_for(&customer, BookingStatus::Completed, Some(now - Duration::days(1)));
    let today = booking_for(&customer, BookingStatus::Completed, Some(now));
    let running = booking_for(&customer, BookingStatus::InProgress, None);
    for booking in [&yesterday, &today, &running] {
        h.repos.bookings.save(booking.clone()).await.expect("save booking");
    }

    let scheduler = Scheduler::new(h.ctx.clone());
    let first = scheduler.survey(now).await.expect("first sweep");
    let second = scheduler.survey(now).await.expect("second sweep");
    assert_eq!(first.affected, 1);
    assert_eq!(first.enqueued, 1);
    assert_eq!(second.enqueued, 0);

    let key = format!("survey:{}:{}", yesterday.id, (now - Duration::days(1)).date_naive());
    let job = h.repos.jobs.find_by_dedupe_key(&key).await.expect("read").expect("survey job");
    assert_eq!(job.kind, JobKind::SendEmail);
    assert_eq!(job.payload["to"], "grace@example.com");
}

#[tokio::test]
async fn reminder_sweep_nudges_pending_suppliers_after_the_cutoff_once_a_day() {
    let h = harness(scripted());
    let now = Utc::now();

    let mut overdue = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    overdue.sent_to_suppliers_at = Some(now - Duration::hours(50));
    h.repos.enquiries.save(overdue.clone()).await.expect("save enquiry");
    let mut recent = seed_enquiry(&h.repos, EnquiryStatus::SentToSuppliers).await;
    recent.sent_to_suppliers_at = Some(now - Duration::hours(10));
    h.repos.enquiries.save(recent.clone()).await.expect("save enquiry");

    let deadline = now + Duration::hours(12);
    let owed = open_invitation(&h.repos, &overdue, supplier("sup-a", 4.3), deadline).await;
    seed_bid(&h.repos, &overdue, supplier("sup-b", 4.1), 940, BidStatus::Submitted).await;
    let fresh = open_invitation(&h.repos, &recent, supplier("sup-c", 4.0), deadline).await;

    let scheduler = Scheduler::new(h.ctx.clone());
    let first = scheduler.reminders(now).await.expect("first sweep");
    let second = scheduler.reminders(now).await.expect("second sweep");
    assert_eq!(first.affected, 1);
    assert_eq!(first.enqueued, 1);
    assert_eq!(second.enqueued, 0);
    assert_eq!(queued_of_kind(&h.repos, JobKind::SendEmail).await, 1);

    let key = format!("reminder:{}:{}", owed.id, now.date_naive());
    assert!(h.repos.jobs.find_by_dedupe_key(&key).await.expect("read").is_some());
    let reminded = h.repos.invitations.find_by_id(&owed.id).await.expect("read").expect("invitation");
    assert!(reminded.last_reminded_at.is_some());
    let untouched = h.repos.invitations.find_by_id(&fresh.id).await.expect("read").expect("invitation");
    assert!(untouched.last_reminded_at.is_none());
}

#[tokio::test]
async fn quote_expiry_sweep_expires_overdue_sent_quotes() {
    let h = harness(quoting_provider());
    let enquiry = seed_enquiry(&h.repos, EnquiryStatus::QuotesReceived).await;
    seed_bid(&h.repos, &enquiry, supplier("sup-a", 4.5), 900, BidStatus::Accepted).await;
    quote_generation::run(&h.ctx, &enquiry.id).await.expect("quote");

    let mut quote =
        h.repos.quotes.find_latest_for_enquiry(&enquiry.id).await.expect("read").expect("quote");
    assert_eq!(quote.status, QuoteStatus::SentToCustomer);
    quote.valid_until = Utc::now() - Duration::hours(1);
    h.repos.quotes.save(quote.clone()).await.expect("save quote");

    let scheduler = Scheduler::new(h.ctx.clone());
    let first = scheduler.run(SweepKind::QuoteExpiry, Utc::now()).await.expect("first sweep");
    let second = scheduler.run(SweepKind::QuoteExpiry, Utc::now()).await.expect("second sweep");
    assert_eq!(first.affected, 1);
    assert_eq!(second.affected, 0);

    let expired = h.repos.quotes.find_by_id(&quote.id).await.expect("read").expect("quote");
    assert_eq!(expired.status, QuoteStatus::Expired);
    assert!(!job_confirmation::accept_quote(&h.ctx, &quote.id).await.expect("accept"));
}
