use chrono::{NaiveDate, Utc};
use serde_json::json;

use crate::commands::{block_on, load_config, open_context, storage_failure, CommandResult, Failure};

pub fn run(date: Option<&str>) -> CommandResult {
    let result = parse_day(date).and_then(|day| {
        let config = load_config()?;
        block_on(async move {
            let (pool, context) = open_context(&config).await?;
            let report = context.costs.spend_report(day).await.map_err(storage_failure);
            let budget = context
                .costs
                .status(config.llm.provider.as_str(), day)
                .await
                .map_err(storage_failure);
            pool.close().await;
            Ok((report?, budget?))
        })
    });

    match result {
        Ok((report, budget)) => CommandResult::success_with(
            "spend",
            format!("{} spent on {} across {} decision type(s)", report.total, report.day, report.lines.len()),
            json!({ "report": report, "budget": budget }),
        ),
        Err(failure) => failure.into_result("spend"),
    }
}

/// `YYYY-MM-DD`; today (UTC) when absent.
pub(crate) fn parse_day(date: Option<&str>) -> Result<NaiveDate, Failure> {
    match date {
        None => Ok(Utc::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| Failure::usage(format!("`{raw}` is not a YYYY-MM-DD date"))),
    }
}
