use std::str::FromStr;

use coachdesk_agent::pipelines::{bids, job_confirmation, PipelineError};
use coachdesk_core::domain::quote::CustomerQuoteId;
use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{block_on, load_config, open_context, CommandResult, Failure};

#[derive(Debug, Clone)]
pub struct BidRequest {
    pub token: String,
    pub price: String,
    pub vehicle: String,
    pub notes: Option<String>,
}

/// Records a supplier bid against its invitation token.
pub fn submit(request: BidRequest) -> CommandResult {
    let result = parse_price(&request.price).and_then(|price| {
        let config = load_config()?;
        block_on(async move {
            let (pool, context) = open_context(&config).await?;
            let receipt = bids::record_bid_submission(
                &context,
                request.token.trim(),
                price,
                &request.vehicle,
                request.notes,
            )
            .await
            .map_err(pipeline_failure);
            pool.close().await;
            receipt
        })
    });

    match result {
        Ok(receipt) => CommandResult::success_with("bid", format!("bid {} recorded", receipt.bid_id), receipt),
        Err(failure) => failure.into_result("bid"),
    }
}

/// Customer acceptance of a sent quote.
pub fn accept_quote(quote_id: &str) -> CommandResult {
    let quote_id = CustomerQuoteId::from(quote_id.trim());
    let result = load_config().and_then(|config| {
        block_on(async move {
            let (pool, context) = open_context(&config).await?;
            let accepted =
                job_confirmation::accept_quote(&context, &quote_id).await.map_err(pipeline_failure);
            pool.close().await;
            if accepted? {
                Ok(quote_id)
            } else {
                Err(Failure::new(
                    "invalid_state",
                    format!("quote {quote_id} is not awaiting the customer's reply"),
                    6,
                ))
            }
        })
    });

    match result {
        Ok(quote_id) => CommandResult::success_with(
            "accept-quote",
            format!("quote {quote_id} accepted; job confirmation queued"),
            json!({ "quote_id": quote_id }),
        ),
        Err(failure) => failure.into_result("accept-quote"),
    }
}

fn parse_price(raw: &str) -> Result<Decimal, Failure> {
    Decimal::from_str(raw.trim()).map_err(|_| Failure::usage(format!("`{raw}` is not a price")))
}

fn pipeline_failure(error: PipelineError) -> Failure {
    match error {
        PipelineError::NotFound { .. } => Failure::new("not_found", error.to_string(), 7),
        PipelineError::InvalidInput(_) => Failure::usage(error.to_string()),
        other => Failure::new("storage", other.to_string(), 6),
    }
}
