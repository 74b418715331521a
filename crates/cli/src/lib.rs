pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::bid::BidRequest;
use commands::intake::IntakeRequest;
use commands::reviews::ReviewAction;
use commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "coachdesk",
    about = "Coachdesk operator CLI",
    long_about = "Operate the coach-booking pipeline: migrations, readiness checks, config inspection, \
                  scheduler sweeps, human review, spend reporting and manual intake.",
    after_help = "Examples:\n  coachdesk doctor --json\n  coachdesk sweep bid-timeout\n  coachdesk reviews list\n  coachdesk intake --message-file enquiry.eml"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, provider readiness, DB connectivity, queue depth and budget")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(
        about = "Run one scheduler sweep now (bid-timeout, quote-expiry, survey, reminders)"
    )]
    Sweep {
        #[arg(help = "Sweep to run")]
        kind: String,
    },
    #[command(subcommand, about = "List and act on human review tasks")]
    Reviews(ReviewsCommand),
    #[command(about = "Report AI spend per decision type for one day")]
    Spend {
        #[arg(long, help = "Day to report, YYYY-MM-DD (defaults to today, UTC)")]
        date: Option<String>,
    },
    #[command(about = "Submit an inbound customer email to the intake pipeline")]
    Intake {
        #[arg(long, help = "File holding the message; optional From:/Subject: headers, blank line, body")]
        message_file: String,
        #[arg(long, help = "Sender address when the file has no From: header")]
        from: Option<String>,
        #[arg(long, help = "Subject when the file has no Subject: header")]
        subject: Option<String>,
        #[arg(long = "run", help = "Process inline instead of enqueueing for the workers")]
        run_inline: bool,
    },
    #[command(about = "Record a supplier bid against an invitation token")]
    Bid {
        #[arg(long, help = "Invitation token from the bid link")]
        token: String,
        #[arg(long, help = "Bid price in the configured currency")]
        price: String,
        #[arg(long, help = "Vehicle offered")]
        vehicle: String,
        #[arg(long)]
        notes: Option<String>,
    },
    #[command(about = "Mark a sent quote as accepted and start job confirmation")]
    AcceptQuote {
        #[arg(help = "Quote id")]
        quote_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ReviewsCommand {
    #[command(about = "List pending review tasks, oldest first")]
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    #[command(about = "Resolve a task, accepting the AI decision as-is")]
    Resolve {
        id: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    #[command(about = "Dismiss a task without further action")]
    Dismiss {
        id: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    #[command(about = "Resolve a task by overriding the logged AI decision")]
    Override {
        id: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long, help = "JSON file with the replacement decision payload")]
        payload_file: Option<String>,
    },
}

impl From<ReviewsCommand> for ReviewAction {
    fn from(command: ReviewsCommand) -> Self {
        match command {
            ReviewsCommand::List { limit } => ReviewAction::List { limit },
            ReviewsCommand::Resolve { id, note } => ReviewAction::Resolve { id, note },
            ReviewsCommand::Dismiss { id, note } => ReviewAction::Dismiss { id, note },
            ReviewsCommand::Override { id, note, payload_file } => {
                ReviewAction::Override { id, note, payload_file }
            }
        }
    }
}

pub fn run() -> ExitCode {
    let result = execute(Cli::parse());
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub fn execute(cli: Cli) -> CommandResult {
    match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => CommandResult { exit_code: 0, output: commands::config::run() },
        Command::Sweep { kind } => commands::sweep::run(&kind),
        Command::Reviews(command) => commands::reviews::run(command.into()),
        Command::Spend { date } => commands::spend::run(date.as_deref()),
        Command::Intake { message_file, from, subject, run_inline } => {
            commands::intake::run(IntakeRequest { message_file, from, subject, run_inline })
        }
        Command::Bid { token, price, vehicle, notes } => {
            commands::bid::submit(BidRequest { token, price, vehicle, notes })
        }
        Command::AcceptQuote { quote_id } => commands::bid::accept_quote(&quote_id),
    }
}
