use std::fs;
use std::path::Path;

use chrono::Utc;
use coachdesk_agent::pipelines::intake;
use coachdesk_core::domain::job::{InboundMessage, NewJob};
use serde_json::json;

use crate::commands::{block_on, load_config, open_context, storage_failure, CommandResult, Failure};

#[derive(Debug, Clone, Default)]
pub struct IntakeRequest {
    pub message_file: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    /// Process the message inline instead of queueing it for the server's workers.
    pub run_inline: bool,
}

pub fn run(request: IntakeRequest) -> CommandResult {
    let result = read_message(&request).and_then(|message| {
        let config = load_config()?;
        block_on(async move {
            let (pool, context) = open_context(&config).await?;
            let outcome = if request.run_inline {
                intake::from_message(&context, message)
                    .await
                    .map(|outcome| ("intake processed".to_string(), json!(outcome)))
                    .map_err(storage_failure)
            } else {
                context
                    .queue
                    .enqueue(NewJob::intake_message(message))
                    .await
                    .map(|job_id| ("intake queued".to_string(), json!({ "job_id": job_id })))
                    .map_err(storage_failure)
            };
            pool.close().await;
            outcome
        })
    });

    match result {
        Ok((message, data)) => CommandResult::success_with("intake", message, data),
        Err(failure) => failure.into_result("intake"),
    }
}

fn read_message(request: &IntakeRequest) -> Result<InboundMessage, Failure> {
    let path = Path::new(&request.message_file);
    let raw = fs::read_to_string(path)
        .map_err(|error| Failure::usage(format!("cannot read {}: {error}", path.display())))?;
    let mut message = parse_message(&raw);

    if let Some(from) = &request.from {
        message.from = from.trim().to_string();
    }
    if request.subject.is_some() {
        message.subject = request.subject.clone();
    }
    if message.from.is_empty() {
        return Err(Failure::usage("message has no sender; add a `From:` header or pass --from"));
    }
    if message.body.trim().is_empty() {
        return Err(Failure::usage("message body is empty"));
    }
    Ok(message)
}

/// Optional `From:` / `Subject:` headers, a blank line, then the body. A file without
/// recognised headers is all body.
pub(crate) fn parse_message(raw: &str) -> InboundMessage {
    let mut from = String::new();
    let mut subject = None;
    let mut lines = raw.lines().peekable();
    let mut saw_header = false;

    while let Some(&line) = lines.peek() {
        let Some((name, value)) = line.split_once(':') else {
            break;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "from" => from = value.trim().to_string(),
            "subject" => subject = Some(value.trim().to_string()),
            _ => break,
        }
        saw_header = true;
        lines.next();
    }

    let body: Vec<&str> = if saw_header {
        lines.skip_while(|line| line.trim().is_empty()).collect()
    } else {
        raw.lines().collect()
    };

    InboundMessage {
        from,
        subject,
        body: body.join("\n").trim().to_string(),
        received_at: Some(Utc::now()),
    }
}
