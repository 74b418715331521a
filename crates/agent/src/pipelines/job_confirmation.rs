//! Stage D: turn an accepted quote into a booking with paperwork and confirmations.

use chrono::Utc;
use tracing::{info, warn};

use coachdesk_core::domain::booking::{AssignmentDetails, Booking, BookingId, BookingStatus};
use coachdesk_core::domain::decision::{DecisionTargets, PipelineRunId};
use coachdesk_core::domain::enquiry::EnquiryStatus;
use coachdesk_core::domain::job::{DocumentPayload, JobKind, NewJob, SendEmailPayload};
use coachdesk_core::domain::quote::{CustomerQuoteId, QuoteStatus};
use coachdesk_core::domain::reference::ReferencePrefix;
use coachdesk_core::domain::review::{ReviewTarget, TargetKind};
use coachdesk_core::outputs::JobDocuments;

use super::{
    fact, format_date, Decided, EmailBrief, PipelineContext, PipelineError, StageOutcome, Step,
};

/// Customer acceptance: `SENT_TO_CUSTOMER -> ACCEPTED`, then queue confirmation.
/// Returns `false` when the quote was not awaiting a reply.
pub async fn accept_quote(
    ctx: &PipelineContext,
    quote_id: &CustomerQuoteId,
) -> Result<bool, PipelineError> {
    let accepted = ctx
        .repos
        .quotes
        .advance_status(quote_id, QuoteStatus::SentToCustomer, QuoteStatus::Accepted, Utc::now())
        .await?;
    if accepted {
        ctx.enqueue(NewJob::job_confirmation(quote_id.clone())).await?;
        info!(event_name = "quotes.accepted", quote_id = %quote_id, "customer accepted quote");
    }
    Ok(accepted)
}

pub async fn run(
    ctx: &PipelineContext,
    quote_id: &CustomerQuoteId,
) -> Result<StageOutcome, PipelineError> {
    let quote = ctx
        .repos
        .quotes
        .find_by_id(quote_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("quote", quote_id))?;
    if quote.status != QuoteStatus::Accepted {
        return Ok(StageOutcome::skipped(format!("quote is {}", quote.status.as_str())));
    }

    let enquiry = ctx
        .repos
        .enquiries
        .find_by_id(&quote.enquiry_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("enquiry", &quote.enquiry_id))?;
    let customer = ctx
        .repos
        .customers
        .find_by_id(&quote.customer_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("customer", &quote.customer_id))?;
    let bid = ctx
        .repos
        .bids
        .find_by_id(&quote.winning_bid_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("bid", &quote.winning_bid_id))?;
    let supplier = ctx
        .repos
        .suppliers
        .find_by_id(&bid.supplier_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("supplier", &bid.supplier_id))?;

    let run = PipelineRunId::generate();
    let mut booking = match ctx.repos.bookings.find_by_quote(quote_id).await? {
        // A confirmed booking means an earlier delivery stopped part way; finish it.
        Some(booking) if booking.status == BookingStatus::Confirmed => booking,
        Some(booking) => {
            return Ok(StageOutcome::skipped(format!(
                "booking {} is already {}",
                booking.reference,
                booking.status.as_str()
            )));
        }
        None => {
            let now = Utc::now();
            let booking = Booking {
                id: BookingId::generate(),
                reference: ctx.next_reference(ReferencePrefix::Booking, now).await?,
                quote_id: quote.id.clone(),
                enquiry_id: enquiry.id.clone(),
                customer_id: customer.id.clone(),
                supplier_id: supplier.id.clone(),
                bid_id: bid.id.clone(),
                total: quote.total(),
                status: BookingStatus::Confirmed,
                assignment: AssignmentDetails {
                    vehicle_description: Some(bid.vehicle_description.clone()),
                    ..AssignmentDetails::default()
                },
                completed_at: None,
                created_at: now,
            };
            ctx.repos.bookings.save(booking.clone()).await?;
            ctx.repos.bookings.append_history(booking.initial_history()).await?;
            info!(
                event_name = "bookings.created",
                correlation_id = %run,
                booking_id = %booking.id,
                reference = %booking.reference,
                "booking created from accepted quote"
            );
            booking
        }
    };

    let target = ReviewTarget { kind: TargetKind::Booking, id: booking.id.to_string() };
    let targets = DecisionTargets::booking(enquiry.id.clone(), booking.id.clone());
    let route = format!("{} to {}", enquiry.trip.pickup_location, enquiry.trip.dropoff_location);
    let vehicle = booking.assignment.vehicle_description.clone().unwrap_or_default();

    let documents_prompt = serde_json::json!({
        "reference": booking.reference,
        "supplier": supplier.name,
        "pickup": enquiry.trip.pickup_location,
        "dropoff": enquiry.trip.dropoff_location,
        "departure": format_date(enquiry.trip.departure_at),
        "return_at": enquiry.trip.return_at.map(|at| format_date(Some(at))).unwrap_or_default(),
        "passengers": enquiry.trip.passenger_count,
        "vehicle": vehicle,
        "requirements": enquiry.trip.special_requirements.clone().unwrap_or_default(),
        "contact_name": enquiry.contact_name,
        "contact_phone": enquiry.contact_phone.clone().unwrap_or_default(),
    });
    let documents = match ctx.decide::<JobDocuments>(&documents_prompt, targets.clone(), &run).await? {
        Decided::Made(outcome) => outcome.output,
        Decided::Failed(failure) => return ctx.escalate_failure(failure, target).await,
    };

    for (kind, content, key) in [
        (JobKind::GenerateJobSheet, documents.job_sheet, "job-sheet"),
        (JobKind::GenerateDriverBriefing, documents.driver_briefing, "driver-briefing"),
    ] {
        ctx.enqueue(
            NewJob::document(kind, DocumentPayload { booking_id: booking.id.clone(), content })
                .with_dedupe_key(format!("{key}:{}", booking.id)),
        )
        .await?;
    }

    let supplier_brief = EmailBrief {
        purpose: "confirm the job with the coach operator",
        recipient_name: supplier.name.clone(),
        recipient_email: supplier.contact_email.clone(),
        facts: vec![
            fact("Booking", booking.reference.clone()),
            fact("Route", route.clone()),
            fact("Departure", format_date(enquiry.trip.departure_at)),
            fact("Passengers", enquiry.trip.passenger_count.to_string()),
            fact("Vehicle", vehicle.clone()),
            fact("Agreed price", format!("{} {}", bid.total_price, quote.currency)),
        ],
        link: String::new(),
    };
    let customer_brief = EmailBrief {
        purpose: "confirm the customer's coach booking",
        recipient_name: customer.name.clone(),
        recipient_email: customer.email.clone(),
        facts: vec![
            fact("Booking", booking.reference.clone()),
            fact("Route", route),
            fact("Departure", format_date(enquiry.trip.departure_at)),
            fact("Operator", supplier.name.clone()),
            fact("Total", format!("{} {}", quote.total(), quote.currency)),
        ],
        link: String::new(),
    };

    for (brief, audience) in [(supplier_brief, "supplier"), (customer_brief, "customer")] {
        let email = match ctx.personalize(&brief, targets.clone(), &target, &run).await? {
            Step::Continue(email) => email,
            Step::Stop(outcome) => return Ok(outcome),
        };
        ctx.enqueue(
            NewJob::send_email(SendEmailPayload {
                to: brief.recipient_email.clone(),
                subject: email.subject,
                html: email.html_body,
            })
            .with_dedupe_key(format!("booking-{audience}:{}", booking.id)),
        )
        .await?;
    }

    let history =
        booking.transition_to(BookingStatus::SupplierAssigned, Some("operator confirmed".to_string()))?;
    ctx.repos.bookings.save(booking.clone()).await?;
    ctx.repos.bookings.append_history(history).await?;

    let moved = ctx
        .repos
        .enquiries
        .advance_status(&enquiry.id, EnquiryStatus::QuoteSent, EnquiryStatus::Accepted)
        .await?;
    if !moved {
        warn!(
            event_name = "bookings.enquiry_not_advanced",
            enquiry_id = %enquiry.id,
            status = enquiry.status.as_str(),
            "enquiry was not awaiting acceptance"
        );
    }

    info!(
        event_name = "bookings.supplier_assigned",
        correlation_id = %run,
        booking_id = %booking.id,
        supplier_id = %supplier.id,
        "job confirmed with operator"
    );
    Ok(StageOutcome::Advanced {
        enquiry_id: enquiry.id,
        status: if moved { EnquiryStatus::Accepted } else { enquiry.status },
    })
}
