use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use coachdesk_core::domain::supplier::{BidId, SupplierBid};
use coachdesk_core::pricing::round_money;

use super::{PipelineContext, PipelineError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BidReceipt {
    pub bid_id: BidId,
    pub evaluation_enqueued: bool,
}

/// Stores a supplier's price against their invitation. The last outstanding bid for an
/// enquiry that is out to suppliers queues bid evaluation.
pub async fn record_bid_submission(
    ctx: &PipelineContext,
    access_token: &str,
    total_price: Decimal,
    vehicle_description: &str,
    notes: Option<String>,
) -> Result<BidReceipt, PipelineError> {
    let invitation = ctx
        .repos
        .invitations
        .find_by_token(access_token)
        .await?
        .ok_or_else(|| PipelineError::not_found("bid invitation", "for the given token"))?;

    let now = Utc::now();
    if !invitation.is_open_at(now) {
        return Err(PipelineError::InvalidInput(format!(
            "invitation is {} and closed at {}",
            invitation.status.as_str(),
            invitation.deadline
        )));
    }
    if total_price <= Decimal::ZERO {
        return Err(PipelineError::InvalidInput("bid price must be positive".to_string()));
    }
    if vehicle_description.trim().is_empty() {
        return Err(PipelineError::InvalidInput("bid must describe the vehicle".to_string()));
    }

    if !ctx.repos.invitations.mark_submitted(&invitation.id, now).await? {
        return Err(PipelineError::InvalidInput("invitation was already used".to_string()));
    }

    let notes = notes.filter(|notes| !notes.trim().is_empty());
    let bid = SupplierBid::new(&invitation, round_money(total_price), vehicle_description.trim(), notes);
    let bid_id = bid.id.clone();
    ctx.repos.bids.save(bid).await?;

    let pending = ctx.repos.invitations.count_pending(&invitation.enquiry_id).await?;
    let evaluation_enqueued =
        pending == 0 && ctx.queue_bid_evaluation(&invitation.enquiry_id).await?;

    info!(
        event_name = "bids.submitted",
        enquiry_id = %invitation.enquiry_id,
        supplier_id = %invitation.supplier_id,
        bid_id = %bid_id,
        pending,
        evaluation_enqueued,
        "supplier bid recorded"
    );
    Ok(BidReceipt { bid_id, evaluation_enqueued })
}
