//! Stage A: turn an inbound message into an enquiry, enrich it and invite suppliers.

use chrono::{Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use coachdesk_core::domain::customer::{normalize_email, Customer};
use coachdesk_core::domain::decision::{DecisionTargets, DecisionType, PipelineRunId};
use coachdesk_core::domain::enquiry::{
    Enquiry, EnquiryEnrichment, EnquiryId, EnquirySource, EnquiryStatus, PriceBand, TripDetails,
    TripType,
};
use coachdesk_core::domain::job::{InboundMessage, IntakePayload, NewJob, SendEmailPayload};
use coachdesk_core::domain::reference::ReferencePrefix;
use coachdesk_core::domain::review::{ReviewReason, ReviewStatus, ReviewTarget, TargetKind};
use coachdesk_core::domain::supplier::{BidInvitation, SupplierOrganisation};
use coachdesk_core::outputs::{
    parse_loose_datetime, EnquiryAnalysis, ParsedEnquiry, SupplierSelection,
};

use super::{
    fact, format_date, Decided, EmailBrief, PipelineContext, PipelineError, StageOutcome, Step,
};

pub async fn run(
    ctx: &PipelineContext,
    payload: IntakePayload,
) -> Result<StageOutcome, PipelineError> {
    match (payload.enquiry_id, payload.message) {
        (Some(enquiry_id), _) => from_enquiry(ctx, &enquiry_id).await,
        (None, Some(message)) => from_message(ctx, message).await,
        (None, None) => {
            Err(PipelineError::InvalidInput("intake needs an enquiry id or a message".to_string()))
        }
    }
}

/// Parses a raw message into a new enquiry, then continues with analysis and selection.
pub async fn from_message(
    ctx: &PipelineContext,
    message: InboundMessage,
) -> Result<StageOutcome, PipelineError> {
    let run = PipelineRunId::generate();
    let target = ReviewTarget { kind: TargetKind::InboundMessage, id: message.from.clone() };
    let prompt = json!({
        "from": message.from,
        "subject": message.subject,
        "body": message.body,
    });

    let outcome = match ctx.decide::<ParsedEnquiry>(&prompt, DecisionTargets::default(), &run).await? {
        Decided::Made(outcome) => outcome,
        Decided::Failed(failure) => return ctx.escalate_failure(failure, target).await,
    };

    if !outcome.auto_executed {
        let context = json!({
            "parsed": outcome.raw,
            "confidence": outcome.confidence,
            "threshold": outcome.verdict.threshold,
            "from": message.from,
            "subject": message.subject,
        });
        return ctx
            .escalate(
                DecisionType::EmailParse,
                target,
                Some(outcome.log_id),
                ReviewReason::LowConfidence,
                context,
            )
            .await;
    }

    let parsed = outcome.output;
    let contact_email = if parsed.contact_email.trim().is_empty() {
        normalize_email(&message.from)
    } else {
        normalize_email(&parsed.contact_email)
    };
    if parsed.pickup_location.trim().is_empty()
        || parsed.dropoff_location.trim().is_empty()
        || parsed.passenger_count == 0
    {
        let context = json!({
            "parsed": outcome.raw,
            "reason": "parsed enquiry is missing a route or passenger count",
        });
        return ctx
            .escalate(
                DecisionType::EmailParse,
                target,
                Some(outcome.log_id),
                ReviewReason::AiFailure,
                context,
            )
            .await;
    }

    let customer = match ctx.repos.customers.find_by_email(&contact_email).await? {
        Some(customer) => customer,
        None => {
            let customer =
                Customer::new(parsed.contact_name.trim(), &contact_email, parsed.contact_phone.clone());
            ctx.repos.customers.save(customer.clone()).await?;
            customer
        }
    };

    let now = Utc::now();
    let enquiry = Enquiry {
        id: EnquiryId::generate(),
        reference: ctx.next_reference(ReferencePrefix::Enquiry, now).await?,
        customer_id: customer.id,
        status: EnquiryStatus::Submitted,
        source: EnquirySource::Email,
        contact_name: parsed.contact_name.trim().to_string(),
        contact_email,
        contact_phone: parsed.contact_phone,
        trip: TripDetails {
            pickup_location: parsed.pickup_location.trim().to_string(),
            dropoff_location: parsed.dropoff_location.trim().to_string(),
            departure_at: parsed.departure_date.as_deref().and_then(parse_loose_datetime),
            return_at: parsed.return_date.as_deref().and_then(parse_loose_datetime),
            passenger_count: parsed.passenger_count,
            trip_type: TripType::parse(&parsed.trip_type).unwrap_or(TripType::OneWay),
            special_requirements: parsed.special_requirements,
        },
        enrichment: EnquiryEnrichment::default(),
        sent_to_suppliers_at: None,
        created_at: now,
        updated_at: now,
    };
    ctx.repos.enquiries.save(enquiry.clone()).await?;
    info!(
        event_name = "intake.enquiry_created",
        correlation_id = %run,
        enquiry_id = %enquiry.id,
        reference = %enquiry.reference,
        "enquiry created from inbound message"
    );

    process(ctx, enquiry, &run).await
}

/// Resumes intake for a stored enquiry.
pub async fn from_enquiry(
    ctx: &PipelineContext,
    enquiry_id: &EnquiryId,
) -> Result<StageOutcome, PipelineError> {
    let enquiry = ctx
        .repos
        .enquiries
        .find_by_id(enquiry_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("enquiry", enquiry_id))?;

    if enquiry.status == EnquiryStatus::UnderReview && has_pending_review(ctx, &enquiry).await? {
        return Ok(StageOutcome::skipped("enquiry is waiting on human review"));
    }
    process(ctx, enquiry, &PipelineRunId::generate()).await
}

async fn process(
    ctx: &PipelineContext,
    enquiry: Enquiry,
    run: &PipelineRunId,
) -> Result<StageOutcome, PipelineError> {
    let enquiry = match enquiry.status {
        EnquiryStatus::Submitted => match analyze(ctx, enquiry, run).await? {
            Step::Continue(enquiry) => enquiry,
            Step::Stop(outcome) => return Ok(outcome),
        },
        EnquiryStatus::UnderReview => enquiry,
        other => {
            return Ok(StageOutcome::skipped(format!("enquiry is {}", other.as_str())));
        }
    };

    select_and_invite(ctx, enquiry, run).await
}

async fn has_pending_review(ctx: &PipelineContext, enquiry: &Enquiry) -> Result<bool, PipelineError> {
    let tasks = ctx.repos.reviews.list_for_target(enquiry.id.as_str()).await?;
    Ok(tasks.iter().any(|task| task.status == ReviewStatus::Pending))
}

fn enquiry_target(enquiry: &Enquiry) -> ReviewTarget {
    ReviewTarget { kind: TargetKind::Enquiry, id: enquiry.id.to_string() }
}

#[derive(Serialize)]
struct TripPrompt<'a> {
    reference: &'a str,
    pickup: &'a str,
    dropoff: &'a str,
    departure: String,
    return_at: String,
    passengers: u32,
    trip_type: &'static str,
    requirements: &'a str,
    currency: &'a str,
}

fn trip_prompt<'a>(enquiry: &'a Enquiry, currency: &'a str) -> TripPrompt<'a> {
    TripPrompt {
        reference: &enquiry.reference,
        pickup: &enquiry.trip.pickup_location,
        dropoff: &enquiry.trip.dropoff_location,
        departure: format_date(enquiry.trip.departure_at),
        return_at: format_date(enquiry.trip.return_at),
        passengers: enquiry.trip.passenger_count,
        trip_type: enquiry.trip.trip_type.as_str(),
        requirements: enquiry.trip.special_requirements.as_deref().unwrap_or("none"),
        currency,
    }
}

/// Low confidence here is logged but does not block: enrichment only informs later prompts.
async fn analyze(
    ctx: &PipelineContext,
    mut enquiry: Enquiry,
    run: &PipelineRunId,
) -> Result<Step<Enquiry>, PipelineError> {
    let prompt = trip_prompt(&enquiry, &ctx.settings.currency);
    let targets = DecisionTargets::enquiry(enquiry.id.clone());

    let analysis = match ctx.decide::<EnquiryAnalysis>(&prompt, targets, run).await? {
        Decided::Made(outcome) => outcome.output,
        Decided::Failed(failure) => {
            let target = enquiry_target(&enquiry);
            return Ok(Step::Stop(ctx.escalate_failure(failure, target).await?));
        }
    };

    enquiry.enrichment = enrichment_from(&analysis);
    ctx.repos.enquiries.update_enrichment(&enquiry.id, &enquiry.enrichment).await?;

    if !ctx
        .repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::Submitted, EnquiryStatus::UnderReview)
        .await?
    {
        return Ok(Step::Stop(StageOutcome::skipped("enquiry left SUBMITTED during analysis")));
    }
    enquiry.status = EnquiryStatus::UnderReview;
    Ok(Step::Continue(enquiry))
}

pub(crate) fn enrichment_from(analysis: &EnquiryAnalysis) -> EnquiryEnrichment {
    let band = match (
        Decimal::from_f64(analysis.estimated_price_min),
        Decimal::from_f64(analysis.estimated_price_max),
    ) {
        (Some(min), Some(max)) => PriceBand::sanitized(min.round_dp(2), max.round_dp(2)),
        _ => None,
    };
    let vehicle = analysis.suggested_vehicle_type.trim();

    EnquiryEnrichment {
        complexity_score: Some(analysis.complexity_score.clamp(1, 10)),
        suggested_vehicle_type: (!vehicle.is_empty()).then(|| vehicle.to_string()),
        estimated_price: band,
        quality_score: Some(analysis.quality_score.clamp(1, 10)),
        analysis_notes: analysis.notes.clone(),
    }
}

#[derive(Serialize)]
struct SupplierLine<'a> {
    id: &'a str,
    name: &'a str,
    rating: String,
    fleet_size: u32,
    vehicle_types: String,
    completed_jobs: u32,
    response_rate: String,
}

async fn select_and_invite(
    ctx: &PipelineContext,
    enquiry: Enquiry,
    run: &PipelineRunId,
) -> Result<StageOutcome, PipelineError> {
    let target = enquiry_target(&enquiry);
    let active = ctx.repos.suppliers.list_active().await?;
    if active.is_empty() {
        return ctx
            .escalate(
                DecisionType::SupplierSelection,
                target,
                None,
                ReviewReason::AiFailure,
                json!({ "reason": "no active suppliers to invite" }),
            )
            .await;
    }

    let lines: Vec<SupplierLine<'_>> = active
        .iter()
        .map(|supplier| SupplierLine {
            id: supplier.id.as_str(),
            name: &supplier.name,
            rating: supplier.rating.map(|rating| format!("{rating:.1}")).unwrap_or_else(|| "unrated".to_string()),
            fleet_size: supplier.fleet_size,
            vehicle_types: supplier.vehicle_types.join(", "),
            completed_jobs: supplier.completed_jobs,
            response_rate: supplier
                .response_rate
                .map(|rate| format!("{:.0}%", rate * 100.0))
                .unwrap_or_else(|| "unknown".to_string()),
        })
        .collect();
    let prompt = json!({
        "reference": enquiry.reference,
        "passengers": enquiry.trip.passenger_count,
        "pickup": enquiry.trip.pickup_location,
        "dropoff": enquiry.trip.dropoff_location,
        "trip_type": enquiry.trip.trip_type.as_str(),
        "vehicle": enquiry.enrichment.suggested_vehicle_type.clone().unwrap_or_default(),
        "suppliers": lines,
        "max_suppliers": ctx.settings.max_suppliers,
    });

    let outcome = match ctx
        .decide::<SupplierSelection>(&prompt, DecisionTargets::enquiry(enquiry.id.clone()), run)
        .await?
    {
        Decided::Made(outcome) => outcome,
        Decided::Failed(failure) => return ctx.escalate_failure(failure, target).await,
    };

    if !outcome.auto_executed {
        let context = json!({
            "selection": outcome.raw,
            "confidence": outcome.confidence,
            "threshold": outcome.verdict.threshold,
        });
        return ctx
            .escalate(
                DecisionType::SupplierSelection,
                target,
                Some(outcome.log_id),
                ReviewReason::LowConfidence,
                context,
            )
            .await;
    }

    let chosen = shortlist(&outcome.output, &active, ctx.settings.max_suppliers);
    if chosen.is_empty() {
        let context = json!({
            "selection": outcome.raw,
            "reason": "none of the recommended suppliers is active",
        });
        return ctx
            .escalate(
                DecisionType::SupplierSelection,
                target,
                Some(outcome.log_id),
                ReviewReason::AiFailure,
                context,
            )
            .await;
    }

    let already_invited = ctx.repos.invitations.list_for_enquiry(&enquiry.id).await?;
    let window = Duration::hours(i64::from(ctx.settings.bid_window_hours));

    // Every email is written before anything is stored, so a failed personalization
    // leaves no invitation behind.
    let mut outgoing = Vec::with_capacity(chosen.len());
    for supplier in chosen {
        if already_invited.iter().any(|invitation| invitation.supplier_id == supplier.id) {
            continue;
        }

        let invitation = BidInvitation::new(enquiry.id.clone(), supplier.id.clone(), window);
        let brief = EmailBrief {
            purpose: "invite a coach operator to price this trip",
            recipient_name: supplier.name.clone(),
            recipient_email: supplier.contact_email.clone(),
            facts: vec![
                fact("Enquiry", enquiry.reference.clone()),
                fact(
                    "Route",
                    format!("{} to {}", enquiry.trip.pickup_location, enquiry.trip.dropoff_location),
                ),
                fact("Departure", format_date(enquiry.trip.departure_at)),
                fact("Passengers", enquiry.trip.passenger_count.to_string()),
                fact("Bids close", format_date(Some(invitation.deadline))),
            ],
            link: ctx.portal_link(&format!("bids/{}", invitation.access_token)),
        };

        match ctx
            .personalize(&brief, DecisionTargets::enquiry(enquiry.id.clone()), &target, run)
            .await?
        {
            Step::Continue(email) => outgoing.push((invitation, supplier.contact_email.clone(), email)),
            Step::Stop(outcome) => return Ok(outcome),
        }
    }

    let invited = outgoing.len();
    for (invitation, to, email) in outgoing {
        let dedupe = format!("invite:{}", invitation.id);
        ctx.repos.invitations.save(invitation).await?;
        ctx.enqueue(
            NewJob::send_email(SendEmailPayload { to, subject: email.subject, html: email.html_body })
                .with_dedupe_key(dedupe),
        )
        .await?;
    }

    if !ctx
        .repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::UnderReview, EnquiryStatus::SentToSuppliers)
        .await?
    {
        return Ok(StageOutcome::skipped("enquiry left UNDER_REVIEW during supplier selection"));
    }

    info!(
        event_name = "intake.suppliers_invited",
        correlation_id = %run,
        enquiry_id = %enquiry.id,
        invited,
        "bid invitations sent"
    );
    Ok(StageOutcome::Advanced { enquiry_id: enquiry.id, status: EnquiryStatus::SentToSuppliers })
}

/// Recommended suppliers that are still active, best score first, without duplicates,
/// capped at the recommended count (at least one, at most `max_suppliers`).
pub(crate) fn shortlist<'a>(
    selection: &SupplierSelection,
    active: &'a [SupplierOrganisation],
    max_suppliers: u32,
) -> Vec<&'a SupplierOrganisation> {
    let limit = selection.recommended_count.clamp(1, max_suppliers.max(1)) as usize;
    let mut picks: Vec<_> = selection.selected_suppliers.iter().collect();
    picks.sort_by(|left, right| right.score.total_cmp(&left.score));

    let mut chosen: Vec<&SupplierOrganisation> = Vec::new();
    for pick in picks {
        if chosen.len() == limit {
            break;
        }
        let Some(supplier) = active.iter().find(|supplier| supplier.id.as_str() == pick.supplier_id)
        else {
            continue;
        };
        if !chosen.iter().any(|existing| existing.id == supplier.id) {
            chosen.push(supplier);
        }
    }
    chosen
}
