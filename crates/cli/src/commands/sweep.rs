use std::sync::Arc;

use chrono::Utc;
use coachdesk_agent::scheduler::{Scheduler, SweepKind};

use crate::commands::{block_on, load_config, open_context, storage_failure, CommandResult, Failure};

pub fn run(sweep: &str) -> CommandResult {
    let result = parse(sweep).and_then(|kind| {
        let config = load_config()?;
        block_on(async move {
            let (pool, context) = open_context(&config).await?;
            let report =
                Scheduler::new(Arc::new(context)).run(kind, Utc::now()).await.map_err(storage_failure);
            pool.close().await;
            report
        })
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "sweep",
            format!("{} sweep touched {} and enqueued {}", report.sweep, report.affected, report.enqueued),
            report,
        ),
        Err(failure) => failure.into_result("sweep"),
    }
}

fn parse(sweep: &str) -> Result<SweepKind, Failure> {
    SweepKind::parse(sweep).ok_or_else(|| {
        let known: Vec<&str> = SweepKind::ALL.iter().map(SweepKind::as_str).collect();
        Failure::usage(format!("unknown sweep `{sweep}`; expected one of {}", known.join(", ")))
    })
}
