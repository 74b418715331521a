use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use coachdesk_core::domain::booking::{AssignmentDetails, Booking, BookingId, BookingStatus};
use coachdesk_core::domain::customer::Customer;
use coachdesk_core::domain::decision::{
    CostRecord, CostRecordId, DecisionAction, DecisionLogEntry, DecisionLogId, DecisionTargets,
    DecisionType, PipelineRunId, TokenUsage,
};
use coachdesk_core::domain::enquiry::{
    Enquiry, EnquiryEnrichment, EnquiryId, EnquirySource, EnquiryStatus, PriceBand, TripDetails,
    TripType,
};
use coachdesk_core::domain::job::{JobCategory, JobState, NewJob};
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteCopy, QuoteStatus};
use coachdesk_core::domain::review::{HumanReviewTask, ReviewReason, ReviewTarget, TargetKind};
use coachdesk_core::domain::supplier::{
    BidInvitation, InvitationStatus, SupplierBid, SupplierId, SupplierOrganisation,
};
use coachdesk_core::jobs::JobStateEngine;
use coachdesk_core::pricing::compute_quote;
use coachdesk_db::migrations::run_pending;
use coachdesk_db::{connect_with_settings, Repositories};

async fn repositories() -> Repositories {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    Repositories::sql(pool)
}

fn enquiry(customer: &Customer) -> Enquiry {
    let now = Utc::now();
    Enquiry {
        id: EnquiryId::generate(),
        reference: "ENQ-2026-00001".to_string(),
        customer_id: customer.id.clone(),
        status: EnquiryStatus::Submitted,
        source: EnquirySource::Web,
        contact_name: customer.name.clone(),
        contact_email: customer.email.clone(),
        contact_phone: None,
        trip: TripDetails {
            pickup_location: "Leeds".to_string(),
            dropoff_location: "York".to_string(),
            departure_at: Some(now + Duration::days(30)),
            return_at: None,
            passenger_count: 48,
            trip_type: TripType::OneWay,
            special_requirements: None,
        },
        enrichment: EnquiryEnrichment::default(),
        sent_to_suppliers_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn supplier(name: &str, rating: f64) -> SupplierOrganisation {
    SupplierOrganisation {
        id: SupplierId::generate(),
        name: name.to_string(),
        contact_email: format!("ops@{}.example", name.to_ascii_lowercase()),
        rating: Some(rating),
        active: true,
        fleet_size: 10,
        vehicle_types: vec!["coach_53".to_string()],
        completed_jobs: 25,
        response_rate: Some(0.8),
    }
}

async fn seeded_enquiry(repos: &Repositories) -> (Customer, Enquiry) {
    let customer = Customer::new("Ada Lovelace", "ada@example.com", None);
    repos.customers.save(customer.clone()).await.expect("save customer");
    let enquiry = enquiry(&customer);
    repos.enquiries.save(enquiry.clone()).await.expect("save enquiry");
    (customer, enquiry)
}

#[tokio::test]
async fn enquiry_status_is_compare_and_set() {
    let repos = repositories().await;
    let (_, enquiry) = seeded_enquiry(&repos).await;

    let first = repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::Submitted, EnquiryStatus::UnderReview)
        .await
        .expect("advance");
    let second = repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::Submitted, EnquiryStatus::UnderReview)
        .await
        .expect("advance again");

    assert!(first);
    assert!(!second, "stale expected status must not match");

    repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::UnderReview, EnquiryStatus::SentToSuppliers)
        .await
        .expect("send");
    let stored = repos.enquiries.find_by_id(&enquiry.id).await.expect("load").expect("exists");
    assert_eq!(stored.status, EnquiryStatus::SentToSuppliers);
    assert!(stored.sent_to_suppliers_at.is_some());
}

#[tokio::test]
async fn enrichment_update_keeps_status_and_round_trips_price_band() {
    let repos = repositories().await;
    let (_, enquiry) = seeded_enquiry(&repos).await;

    let enrichment = EnquiryEnrichment {
        complexity_score: Some(4),
        suggested_vehicle_type: Some("coach_53".to_string()),
        estimated_price: PriceBand::sanitized(Decimal::new(800, 0), Decimal::new(1100, 0)),
        quality_score: Some(8),
        analysis_notes: None,
    };
    repos.enquiries.update_enrichment(&enquiry.id, &enrichment).await.expect("enrich");

    let stored = repos.enquiries.find_by_id(&enquiry.id).await.expect("load").expect("exists");
    assert_eq!(stored.status, EnquiryStatus::Submitted);
    assert_eq!(stored.enrichment, enrichment);
}

#[tokio::test]
async fn sequence_increments_atomically_per_name() {
    let repos = repositories().await;

    assert_eq!(repos.sequences.next_value("ENQ-2026").await.expect("next"), 1);
    assert_eq!(repos.sequences.next_value("ENQ-2026").await.expect("next"), 2);
    assert_eq!(repos.sequences.next_value("QUO-2026").await.expect("next"), 1);
}

#[tokio::test]
async fn job_queue_ignores_duplicate_dedupe_keys_and_claims_once() {
    let repos = repositories().await;
    let engine = JobStateEngine::new();
    let enquiry_id = EnquiryId::from("enq-1");

    let first = engine.create_job(NewJob::bid_evaluation(enquiry_id.clone()));
    let second = engine.create_job(NewJob::bid_evaluation(enquiry_id));

    assert!(repos.jobs.enqueue(first.clone()).await.expect("enqueue"));
    assert!(!repos.jobs.enqueue(second).await.expect("enqueue duplicate"));

    let now = Utc::now() + Duration::seconds(1);
    let claimed = repos
        .jobs
        .claim_next(JobCategory::Pipeline, "worker-a", now)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.state, JobState::Running);
    assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));

    let none = repos.jobs.claim_next(JobCategory::Pipeline, "worker-b", now).await.expect("claim");
    assert!(none.is_none(), "a running job is not claimable");

    let completed = engine.complete_job(claimed).expect("complete");
    repos.jobs.save(completed).await.expect("save");
    let stored = repos.jobs.find_by_id(&first.id).await.expect("load").expect("exists");
    assert_eq!(stored.state, JobState::Completed);
}

#[tokio::test]
async fn stale_claims_are_released() {
    let repos = repositories().await;
    let engine = JobStateEngine::new();
    let job = engine.create_job(NewJob::send_email(
        coachdesk_core::domain::job::SendEmailPayload {
            to: "ops@example.com".to_string(),
            subject: "hi".to_string(),
            html: "<p>hi</p>".to_string(),
        },
    ));
    repos.jobs.enqueue(job).await.expect("enqueue");

    let claimed_at = Utc::now() + Duration::seconds(1);
    repos
        .jobs
        .claim_next(JobCategory::Notification, "worker-a", claimed_at)
        .await
        .expect("claim")
        .expect("job available");

    let released =
        repos.jobs.release_stale(claimed_at + Duration::seconds(1)).await.expect("release");
    assert_eq!(released, 1);
    assert_eq!(repos.jobs.list_by_state(JobState::RetryableFailed).await.expect("list").len(), 1);
}

#[tokio::test]
async fn daily_spend_is_an_exact_sum_per_provider() {
    let repos = repositories().await;
    let day = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");

    for (provider, cost) in
        [("openai", Decimal::new(45, 5)), ("openai", Decimal::new(75, 4)), ("ollama", Decimal::ZERO)]
    {
        repos
            .costs
            .record(CostRecord {
                id: CostRecordId::generate(),
                day,
                decision_type: DecisionType::BidEvaluation,
                provider: provider.to_string(),
                model: "gpt-4o".to_string(),
                usage: TokenUsage { prompt_tokens: 1_000, completion_tokens: 500 },
                cost,
                decision_log_id: None,
                created_at: Utc::now(),
            })
            .await
            .expect("record");
    }

    let spent = repos.costs.daily_spend("openai", day).await.expect("sum");
    assert_eq!(spent, Decimal::new(795, 5));

    let other_day = day.succ_opt().expect("next day");
    assert_eq!(repos.costs.daily_spend("openai", other_day).await.expect("sum"), Decimal::ZERO);

    let breakdown = repos.costs.daily_breakdown(day).await.expect("breakdown");
    assert_eq!(breakdown.len(), 1);
    assert_eq!(breakdown[0].calls, 3);
    assert_eq!(breakdown[0].prompt_tokens, 3_000);
}

#[tokio::test]
async fn overdue_invitations_expire_in_bulk_once() {
    let repos = repositories().await;
    let (_, enquiry) = seeded_enquiry(&repos).await;
    let fast = supplier("Fast", 4.5);
    let slow = supplier("Slow", 4.0);
    repos.suppliers.save(fast.clone()).await.expect("save supplier");
    repos.suppliers.save(slow.clone()).await.expect("save supplier");

    let overdue = BidInvitation::new(enquiry.id.clone(), fast.id.clone(), Duration::hours(-1));
    let open = BidInvitation::new(enquiry.id.clone(), slow.id.clone(), Duration::hours(24));
    repos.invitations.save(overdue.clone()).await.expect("save invitation");
    repos.invitations.save(open.clone()).await.expect("save invitation");

    let affected = repos.invitations.expire_overdue(Utc::now()).await.expect("expire");
    assert_eq!(affected, vec![enquiry.id.clone()]);
    assert_eq!(repos.invitations.count_pending(&enquiry.id).await.expect("count"), 1);

    let again = repos.invitations.expire_overdue(Utc::now()).await.expect("expire again");
    assert!(again.is_empty());

    let stored = repos.invitations.find_by_token(&overdue.access_token).await.expect("load");
    assert_eq!(stored.map(|invitation| invitation.status), Some(InvitationStatus::Expired));

    assert!(repos.invitations.mark_submitted(&open.id, Utc::now()).await.expect("submit"));
    assert!(!repos.invitations.mark_submitted(&open.id, Utc::now()).await.expect("resubmit"));
}

#[tokio::test]
async fn quotes_bookings_and_customer_history_round_trip() {
    let repos = repositories().await;
    let (customer, enquiry) = seeded_enquiry(&repos).await;
    let operator = supplier("Northern", 4.2);
    repos.suppliers.save(operator.clone()).await.expect("save supplier");
    let invitation = BidInvitation::new(enquiry.id.clone(), operator.id.clone(), Duration::hours(24));
    repos.invitations.save(invitation.clone()).await.expect("save invitation");
    let bid = SupplierBid::new(&invitation, Decimal::new(900, 0), "53-seat coach", None);
    repos.bids.save(bid.clone()).await.expect("save bid");

    let quote = CustomerQuote {
        id: CustomerQuoteId::generate(),
        reference: "QUO-2026-00001".to_string(),
        enquiry_id: enquiry.id.clone(),
        customer_id: customer.id.clone(),
        winning_bid_id: bid.id.clone(),
        pricing: compute_quote(Decimal::new(900, 0), Decimal::new(35, 0), Decimal::new(20, 2)),
        currency: "GBP".to_string(),
        copy: QuoteCopy::default(),
        status: QuoteStatus::Draft,
        valid_until: Utc::now() - Duration::minutes(1),
        sent_at: None,
        created_at: Utc::now(),
    };
    repos.quotes.save(quote.clone()).await.expect("save quote");

    let stored = repos.quotes.find_by_id(&quote.id).await.expect("load").expect("exists");
    assert_eq!(stored.pricing.total.to_string(), "1458.00");

    assert!(repos
        .quotes
        .advance_status(&quote.id, QuoteStatus::Draft, QuoteStatus::SentToCustomer, Utc::now())
        .await
        .expect("send"));
    assert_eq!(repos.quotes.expire_overdue(Utc::now()).await.expect("expire"), 1);

    let booking = Booking {
        id: BookingId::generate(),
        reference: "BKG-2026-00001".to_string(),
        quote_id: quote.id.clone(),
        enquiry_id: enquiry.id.clone(),
        customer_id: customer.id.clone(),
        supplier_id: operator.id.clone(),
        bid_id: bid.id.clone(),
        total: quote.pricing.total,
        status: BookingStatus::Confirmed,
        assignment: AssignmentDetails::default(),
        completed_at: None,
        created_at: Utc::now(),
    };
    repos.bookings.save(booking.clone()).await.expect("save booking");
    repos.bookings.append_history(booking.initial_history()).await.expect("history");

    let history = repos.customers.history(&customer.id).await.expect("history");
    assert_eq!(history.prior_booking_count, 1);
    assert_eq!(history.quotes_sent, 1);
    assert_eq!(history.quotes_accepted, 0);
    assert_eq!(history.average_spend, Some(Decimal::new(145800, 2)));

    let found = repos.customers.find_by_email("  ADA@example.com").await.expect("lookup");
    assert_eq!(found.map(|found| found.id), Some(customer.id));
}

#[tokio::test]
async fn decision_log_and_review_tasks_persist() {
    let repos = repositories().await;
    let (_, enquiry) = seeded_enquiry(&repos).await;
    let run = PipelineRunId::generate();

    let entry = DecisionLogEntry {
        id: DecisionLogId::generate(),
        decision_type: DecisionType::EmailParse,
        pipeline_run_id: run.clone(),
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        prompt: json!([{"role": "user", "content": "need a coach"}]),
        raw_response: Some(json!({"confidence_score": 0.55})),
        parsed_output: None,
        confidence_score: 0.55,
        action: DecisionAction::EscalatedToHuman,
        escalation_reason: Some("confidence 0.55 below threshold 0.75".to_string()),
        usage: TokenUsage { prompt_tokens: 120, completion_tokens: 80 },
        latency_ms: 640,
        estimated_cost: Decimal::new(66, 6),
        targets: DecisionTargets::enquiry(enquiry.id.clone()),
        overrides_entry_id: None,
        created_at: Utc::now(),
    };
    let id = repos.decisions.append(entry.clone()).await.expect("append");

    let loaded = repos.decisions.find_by_id(&id).await.expect("load").expect("exists");
    assert_eq!(loaded.action, DecisionAction::EscalatedToHuman);
    assert_eq!(loaded.estimated_cost, Decimal::new(66, 6));
    assert_eq!(repos.decisions.list_for_run(&run).await.expect("list").len(), 1);

    let mut task = HumanReviewTask::open(
        DecisionType::EmailParse,
        ReviewTarget { kind: TargetKind::Enquiry, id: enquiry.id.0.clone() },
        Some(id),
        ReviewReason::LowConfidence,
        json!({"confidence": 0.55}),
    );
    repos.reviews.save(task.clone()).await.expect("save task");
    assert_eq!(repos.reviews.list_pending(10).await.expect("pending").len(), 1);

    task.resolve("entered manually").expect("resolve");
    repos.reviews.save(task.clone()).await.expect("save resolved");
    assert!(repos.reviews.list_pending(10).await.expect("pending").is_empty());
    assert_eq!(repos.reviews.list_for_target(&enquiry.id.0).await.expect("target").len(), 1);
}

#[tokio::test]
async fn settings_upsert_and_list() {
    let repos = repositories().await;

    repos.settings.set("markup.min_percent", "12").await.expect("set");
    repos.settings.set("markup.min_percent", "18").await.expect("overwrite");
    repos.settings.set("budget.daily", "40").await.expect("set");

    assert_eq!(
        repos.settings.get("markup.min_percent").await.expect("get").as_deref(),
        Some("18")
    );
    assert_eq!(repos.settings.get("missing").await.expect("get"), None);
    assert_eq!(repos.settings.list().await.expect("list").len(), 2);
}
