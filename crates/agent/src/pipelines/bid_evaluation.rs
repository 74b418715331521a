//! Stage B: rank the submitted bids and award the recommended one.

use serde::Serialize;
use serde_json::json;
use tracing::info;

use coachdesk_core::domain::decision::{DecisionTargets, DecisionType, PipelineRunId};
use coachdesk_core::domain::enquiry::{Enquiry, EnquiryId, EnquiryStatus};
use coachdesk_core::domain::job::NewJob;
use coachdesk_core::domain::review::{ReviewTarget, TargetKind};
use coachdesk_core::domain::supplier::{
    BidAssessment, BidStatus, SupplierBid, SupplierOrganisation,
};
use coachdesk_core::outputs::BidEvaluation;

use super::{Decided, PipelineContext, PipelineError, StageOutcome, Step};
use crate::guardrails::{GuardrailDecision, GuardrailIntent};

#[derive(Serialize)]
struct BidLine<'a> {
    id: &'a str,
    supplier: &'a str,
    rating: String,
    price: String,
    vehicle: &'a str,
    notes: &'a str,
}

pub async fn run(ctx: &PipelineContext, enquiry_id: &EnquiryId) -> Result<StageOutcome, PipelineError> {
    let enquiry = ctx
        .repos
        .enquiries
        .find_by_id(enquiry_id)
        .await?
        .ok_or_else(|| PipelineError::not_found("enquiry", enquiry_id))?;
    let resuming = match enquiry.status {
        EnquiryStatus::SentToSuppliers => false,
        EnquiryStatus::QuotesReceived => match resume(ctx, enquiry_id).await? {
            Step::Continue(()) => true,
            Step::Stop(outcome) => return Ok(outcome),
        },
        status => return Ok(StageOutcome::skipped(format!("enquiry is {}", status.as_str()))),
    };

    let bids: Vec<SupplierBid> = ctx
        .repos
        .bids
        .list_for_enquiry(enquiry_id)
        .await?
        .into_iter()
        .filter(|bid| bid.status == BidStatus::Submitted)
        .collect();
    if bids.is_empty() {
        info!(event_name = "bids.none_received", enquiry_id = %enquiry_id, "no bids to evaluate");
        return Ok(StageOutcome::NoBids { enquiry_id: enquiry_id.clone() });
    }

    let mut suppliers: Vec<SupplierOrganisation> = Vec::new();
    for bid in &bids {
        if suppliers.iter().any(|supplier| supplier.id == bid.supplier_id) {
            continue;
        }
        let supplier = ctx
            .repos
            .suppliers
            .find_by_id(&bid.supplier_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("supplier", &bid.supplier_id))?;
        suppliers.push(supplier);
    }
    let low_rated = ctx.guardrails.low_rated(&suppliers);

    let run = PipelineRunId::generate();
    let target = ReviewTarget { kind: TargetKind::Enquiry, id: enquiry_id.to_string() };
    let prompt = evaluation_prompt(&enquiry, &bids, &suppliers, &ctx.settings.currency);

    let outcome = match ctx
        .decide::<BidEvaluation>(&prompt, DecisionTargets::enquiry(enquiry_id.clone()), &run)
        .await?
    {
        Decided::Made(outcome) => outcome,
        Decided::Failed(failure) => return ctx.escalate_failure(failure, target).await,
    };

    let evaluation = outcome.output;
    for bid in &bids {
        let mut assessed = bid.clone();
        assessed.assessment = assessment_for(&evaluation, bid);
        ctx.repos.bids.save(assessed).await?;
    }

    if !resuming
        && !ctx
            .repos
            .enquiries
            .advance_status(enquiry_id, EnquiryStatus::SentToSuppliers, EnquiryStatus::QuotesReceived)
            .await?
    {
        return Ok(StageOutcome::skipped("enquiry left SENT_TO_SUPPLIERS during evaluation"));
    }

    let winner_found = bids.iter().any(|bid| bid.id.as_str() == evaluation.recommended_bid_id);
    let intent = GuardrailIntent::AwardBid {
        verdict: outcome.verdict,
        anomalous_bid_ids: evaluation.anomalies.iter().map(|anomaly| anomaly.bid_id.clone()).collect(),
        low_rated_supplier_ids: low_rated.clone(),
        winner_found,
    };

    if let GuardrailDecision::Escalate { reason, reason_code, message } =
        ctx.guardrails.evaluate(&intent)
    {
        let context = json!({
            "evaluation": outcome.raw,
            "confidence": outcome.confidence,
            "threshold": outcome.verdict.threshold,
            "reason_code": reason_code,
            "message": message,
            "recommended_bid_id": evaluation.recommended_bid_id,
            "low_rated_suppliers": low_rated,
        });
        return ctx
            .escalate(DecisionType::BidEvaluation, target, Some(outcome.log_id), reason, context)
            .await;
    }

    for bid in &bids {
        let mut decided = bid.clone();
        decided.assessment = assessment_for(&evaluation, bid);
        decided.status = if bid.id.as_str() == evaluation.recommended_bid_id {
            BidStatus::Accepted
        } else {
            BidStatus::Rejected
        };
        ctx.repos.bids.save(decided).await?;
    }

    ctx.enqueue(NewJob::quote_generation(enquiry_id.clone())).await?;
    info!(
        event_name = "bids.awarded",
        correlation_id = %run,
        enquiry_id = %enquiry_id,
        bid_id = %evaluation.recommended_bid_id,
        bids = bids.len(),
        "winning bid accepted"
    );
    Ok(StageOutcome::Advanced { enquiry_id: enquiry_id.clone(), status: EnquiryStatus::QuotesReceived })
}

/// A previous delivery already moved the enquiry to QUOTES_RECEIVED. An awarded bid only
/// needs its quote queued again; a bid evaluation under review stays parked; anything else
/// is evaluated again without the status step.
async fn resume(ctx: &PipelineContext, enquiry_id: &EnquiryId) -> Result<Step<()>, PipelineError> {
    let bids = ctx.repos.bids.list_for_enquiry(enquiry_id).await?;
    if let Some(winner) = bids.iter().find(|bid| bid.status == BidStatus::Accepted) {
        let queued = ctx.enqueue(NewJob::quote_generation(enquiry_id.clone())).await?.is_some();
        info!(
            event_name = "bids.award_resumed",
            enquiry_id = %enquiry_id,
            bid_id = %winner.id,
            queued,
            "awarded bid found on redelivery"
        );
        return Ok(Step::Stop(StageOutcome::Advanced {
            enquiry_id: enquiry_id.clone(),
            status: EnquiryStatus::QuotesReceived,
        }));
    }

    let reviewed = ctx
        .repos
        .reviews
        .list_for_target(&enquiry_id.to_string())
        .await?
        .iter()
        .any(|task| task.decision_type == DecisionType::BidEvaluation);
    if reviewed {
        return Ok(Step::Stop(StageOutcome::skipped("bid evaluation is with human review")));
    }
    Ok(Step::Continue(()))
}

fn assessment_for(evaluation: &BidEvaluation, bid: &SupplierBid) -> BidAssessment {
    let ranking = evaluation.ranking_for(bid.id.as_str());
    BidAssessment {
        fairness_score: ranking.map(|ranking| ranking.fairness_score),
        rank: ranking.map(|ranking| ranking.rank),
        reasoning: ranking.and_then(|ranking| ranking.reasoning.clone()),
        anomaly: evaluation.is_anomalous(bid.id.as_str()),
    }
}

fn evaluation_prompt(
    enquiry: &Enquiry,
    bids: &[SupplierBid],
    suppliers: &[SupplierOrganisation],
    currency: &str,
) -> serde_json::Value {
    let lines: Vec<BidLine<'_>> = bids
        .iter()
        .map(|bid| {
            let supplier = suppliers.iter().find(|supplier| supplier.id == bid.supplier_id);
            BidLine {
                id: bid.id.as_str(),
                supplier: supplier.map(|supplier| supplier.name.as_str()).unwrap_or("unknown"),
                rating: supplier
                    .and_then(|supplier| supplier.rating)
                    .map(|rating| format!("{rating:.1}"))
                    .unwrap_or_else(|| "unrated".to_string()),
                price: format!("{} {currency}", bid.total_price),
                vehicle: &bid.vehicle_description,
                notes: bid.notes.as_deref().unwrap_or_default(),
            }
        })
        .collect();

    let estimate = enquiry
        .enrichment
        .estimated_price
        .map(|band| format!("{} - {} {currency}", band.min, band.max))
        .unwrap_or_default();

    json!({
        "reference": enquiry.reference,
        "passengers": enquiry.trip.passenger_count,
        "pickup": enquiry.trip.pickup_location,
        "dropoff": enquiry.trip.dropoff_location,
        "trip_type": enquiry.trip.trip_type.as_str(),
        "estimate": estimate,
        "bids": lines,
    })
}
