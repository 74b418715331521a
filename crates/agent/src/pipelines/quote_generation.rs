//! Stage C: price the winning bid and send the customer a quote.
//!
//! Markup is always clamped into the configured bounds and the money arithmetic is done
//! here, never by the model. Low confidence on these decisions is logged but still commits.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use coachdesk_core::domain::customer::{Customer, CustomerHistory};
use coachdesk_core::domain::decision::{DecisionTargets, DecisionType, PipelineRunId};
use coachdesk_core::domain::enquiry::{Enquiry, EnquiryId, EnquiryStatus};
use coachdesk_core::domain::job::{NewJob, SendEmailPayload};
use coachdesk_core::domain::quote::{CustomerQuote, CustomerQuoteId, QuoteCopy, QuoteStatus};
use coachdesk_core::domain::reference::ReferencePrefix;
use coachdesk_core::domain::review::{ReviewReason, ReviewTarget, TargetKind};
use coachdesk_core::domain::supplier::{BidStatus, SupplierBid};
use coachdesk_core::outputs::{MarkupRecommendation, QuoteContent};
use coachdesk_core::pricing::compute_quote;

use super::{
    fact, format_date, Decided, EmailBrief, PipelineContext, PipelineError, StageOutcome, Step,
};
use crate::guardrails::{GuardrailDecision, GuardrailIntent};

pub async fn run(ctx: &PipelineContext, enquiry_id: &EnquiryId) -> Result<StageOutcome, PipelineError> {
    let enquiry = ctx
        .repos
        .enquiries
        .find_by_id(enquiry_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("enquiry", enquiry_id))?;
    if enquiry.status != EnquiryStatus::QuotesReceived {
        return Ok(StageOutcome::skipped(format!("enquiry is {}", enquiry.status.as_str())));
    }

    let target = ReviewTarget { kind: TargetKind::Enquiry, id: enquiry_id.to_string() };
    let Some(winner) = ctx
        .repos
        .bids
        .list_for_enquiry(enquiry_id)
        .await?
        .into_iter()
        .find(|bid| bid.status == BidStatus::Accepted)
    else {
        return ctx
            .escalate(
                DecisionType::MarkupCalculation,
                target,
                None,
                ReviewReason::AiFailure,
                json!({ "reason": "enquiry has no accepted bid to quote from" }),
            )
            .await;
    };

    let customer = ctx
        .repos
        .customers
        .find_by_id(&enquiry.customer_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("customer", &enquiry.customer_id))?;
    let run = PipelineRunId::generate();

    let quote = match ctx.repos.quotes.find_latest_for_enquiry(enquiry_id).await? {
        Some(quote) if quote.status == QuoteStatus::Draft => quote,
        // Sent on an earlier delivery that stopped before the enquiry moved.
        Some(quote) if quote.status == QuoteStatus::SentToCustomer => {
            return mark_quote_sent(ctx, enquiry_id, &quote, &run).await;
        }
        Some(quote) => {
            return Ok(StageOutcome::skipped(format!(
                "quote {} is already {}",
                quote.reference,
                quote.status.as_str()
            )));
        }
        None => match draft_quote(ctx, &enquiry, &customer, &winner, &target, &run).await? {
            Step::Continue(quote) => quote,
            Step::Stop(outcome) => return Ok(outcome),
        },
    };

    let brief = EmailBrief {
        purpose: "send the customer their coach hire quote",
        recipient_name: customer.name.clone(),
        recipient_email: customer.email.clone(),
        facts: vec![
            fact("Quote", quote.reference.clone()),
            fact(
                "Route",
                format!("{} to {}", enquiry.trip.pickup_location, enquiry.trip.dropoff_location),
            ),
            fact("Departure", format_date(enquiry.trip.departure_at)),
            fact("Passengers", enquiry.trip.passenger_count.to_string()),
            fact("Vehicle", winner.vehicle_description.clone()),
            fact("Total", format!("{} {}", quote.total(), quote.currency)),
            fact("Valid until", format_date(Some(quote.valid_until))),
        ],
        link: ctx.portal_link(&format!("quotes/{}", quote.id)),
    };
    let targets = DecisionTargets::quote(enquiry_id.clone(), quote.id.clone());
    let email = match ctx.personalize(&brief, targets, &target, &run).await? {
        Step::Continue(email) => email,
        Step::Stop(outcome) => return Ok(outcome),
    };

    ctx.enqueue(
        NewJob::send_email(SendEmailPayload {
            to: customer.email.clone(),
            subject: email.subject,
            html: email.html_body,
        })
        .with_dedupe_key(format!("quote-email:{}", quote.id)),
    )
    .await?;

    if !ctx
        .repos
        .quotes
        .advance_status(&quote.id, QuoteStatus::Draft, QuoteStatus::SentToCustomer, Utc::now())
        .await?
    {
        let current = ctx.repos.quotes.find_by_id(&quote.id).await?.map(|quote| quote.status);
        if current != Some(QuoteStatus::SentToCustomer) {
            return Ok(StageOutcome::skipped(format!(
                "quote {} left DRAFT during quoting ({})",
                quote.reference,
                current.map(|status| status.as_str()).unwrap_or("missing")
            )));
        }
    }
    mark_quote_sent(ctx, enquiry_id, &quote, &run).await
}

/// Final step once the quote is `SENT_TO_CUSTOMER`: move the enquiry to `QUOTE_SENT`.
async fn mark_quote_sent(
    ctx: &PipelineContext,
    enquiry_id: &EnquiryId,
    quote: &CustomerQuote,
    run: &PipelineRunId,
) -> Result<StageOutcome, PipelineError> {
    if !ctx
        .repos
        .enquiries
        .advance_status(enquiry_id, EnquiryStatus::QuotesReceived, EnquiryStatus::QuoteSent)
        .await?
    {
        return Ok(StageOutcome::skipped("enquiry left QUOTES_RECEIVED during quoting"));
    }

    info!(
        event_name = "quotes.sent",
        correlation_id = %run,
        enquiry_id = %enquiry_id,
        quote_id = %quote.id,
        reference = %quote.reference,
        total = %quote.total(),
        "quote sent to customer"
    );
    Ok(StageOutcome::Advanced { enquiry_id: enquiry_id.clone(), status: EnquiryStatus::QuoteSent })
}

async fn draft_quote(
    ctx: &PipelineContext,
    enquiry: &Enquiry,
    customer: &Customer,
    winner: &SupplierBid,
    target: &ReviewTarget,
    run: &PipelineRunId,
) -> Result<Step<CustomerQuote>, PipelineError> {
    let quote_id = CustomerQuoteId::generate();
    let targets = DecisionTargets::quote(enquiry.id.clone(), quote_id.clone());
    let history = ctx.repos.customers.history(&customer.id).await?;
    let bounds = ctx.markup_bounds().await;

    let markup_prompt = json!({
        "supplier_price": winner.total_price.to_string(),
        "currency": ctx.settings.currency,
        "passengers": enquiry.trip.passenger_count,
        "pickup": enquiry.trip.pickup_location,
        "dropoff": enquiry.trip.dropoff_location,
        "prior_bookings": history.prior_booking_count,
        "acceptance_rate": acceptance_label(&history),
        "average_spend": history
            .average_spend
            .map(|spend| format!("{spend} {}", ctx.settings.currency))
            .unwrap_or_else(|| "unknown".to_string()),
        "min_percent": bounds.min_percent.to_string(),
        "max_percent": bounds.max_percent.to_string(),
    });
    let recommendation =
        match ctx.decide::<MarkupRecommendation>(&markup_prompt, targets.clone(), run).await? {
            Decided::Made(outcome) => outcome.output,
            Decided::Failed(failure) => {
                return Ok(Step::Stop(ctx.escalate_failure(failure, target.clone()).await?));
            }
        };

    let intent = GuardrailIntent::ApplyMarkup {
        recommended_percent: recommendation.markup_percent,
        bounds,
    };
    let markup_percent = match ctx.guardrails.evaluate(&intent) {
        GuardrailDecision::Adjust { reason_code, applied } => {
            warn!(
                event_name = "pricing.markup_clamped",
                correlation_id = %run,
                enquiry_id = %enquiry.id,
                reason_code,
                recommended = recommendation.markup_percent,
                applied = %applied,
                "markup recommendation outside bounds"
            );
            applied
        }
        _ => bounds.clamp_recommendation(recommendation.markup_percent),
    };
    let pricing = compute_quote(winner.total_price, markup_percent, ctx.settings.tax_rate);

    let content_prompt = json!({
        "customer_name": customer.name,
        "pickup": enquiry.trip.pickup_location,
        "dropoff": enquiry.trip.dropoff_location,
        "departure": format_date(enquiry.trip.departure_at),
        "passengers": enquiry.trip.passenger_count,
        "trip_type": enquiry.trip.trip_type.as_str(),
        "vehicle": winner.vehicle_description,
        "total": pricing.total.to_string(),
        "currency": ctx.settings.currency,
        "tax_amount": pricing.tax_amount.to_string(),
    });
    let content = match ctx.decide::<QuoteContent>(&content_prompt, targets, run).await? {
        Decided::Made(outcome) => outcome.output,
        Decided::Failed(failure) => {
            return Ok(Step::Stop(ctx.escalate_failure(failure, target.clone()).await?));
        }
    };

    let now = Utc::now();
    let quote = CustomerQuote {
        id: quote_id,
        reference: ctx.next_reference(ReferencePrefix::Quote, now).await?,
        enquiry_id: enquiry.id.clone(),
        customer_id: customer.id.clone(),
        winning_bid_id: winner.id.clone(),
        pricing,
        currency: ctx.settings.currency.clone(),
        copy: QuoteCopy {
            headline: Some(content.headline),
            body: Some(quote_body(&content.body, &content.highlights)),
            markup_reasoning: recommendation.reasoning,
            acceptance_probability: recommendation.acceptance_probability,
        },
        status: QuoteStatus::Draft,
        valid_until: now + Duration::days(i64::from(ctx.settings.quote_validity_days)),
        sent_at: None,
        created_at: now,
    };
    ctx.repos.quotes.save(quote.clone()).await?;
    Ok(Step::Continue(quote))
}

fn acceptance_label(history: &CustomerHistory) -> String {
    history
        .acceptance_rate()
        .map(|rate| format!("{:.0}%", rate * 100.0))
        .unwrap_or_else(|| "unknown".to_string())
}

fn quote_body(body: &str, highlights: &[String]) -> String {
    if highlights.is_empty() {
        return body.to_string();
    }
    let bullets: Vec<String> = highlights.iter().map(|line| format!("- {line}")).collect();
    format!("{body}\n\n{}", bullets.join("\n"))
}
