//! Time-triggered sweeps. Each sweep is idempotent: bulk updates are guarded by status and
//! every job it enqueues carries a dedupe key.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use coachdesk_core::domain::job::{NewJob, SendEmailPayload};
use coachdesk_core::domain::supplier::InvitationStatus;

use crate::pipelines::{format_date, PipelineContext, PipelineError};
use crate::prompts::EmailTemplate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepKind {
    BidTimeout,
    QuoteExpiry,
    Survey,
    Reminders,
}

impl SweepKind {
    pub const ALL: [SweepKind; 4] = [Self::BidTimeout, Self::QuoteExpiry, Self::Survey, Self::Reminders];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BidTimeout => "bid-timeout",
            Self::QuoteExpiry => "quote-expiry",
            Self::Survey => "survey",
            Self::Reminders => "reminders",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bid-timeout" | "bid_timeout" => Some(Self::BidTimeout),
            "quote-expiry" | "quote_expiry" => Some(Self::QuoteExpiry),
            "survey" => Some(Self::Survey),
            "reminders" | "reminder" => Some(Self::Reminders),
            _ => None,
        }
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sweep: SweepKind,
    /// Rows the sweep touched or inspected
    pub affected: u64,
    /// Jobs actually enqueued (deduplicated ones excluded)
    pub enqueued: u64,
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<PipelineContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, sweep: SweepKind, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let report = match sweep {
            SweepKind::BidTimeout => self.bid_timeout(now).await?,
            SweepKind::QuoteExpiry => self.quote_expiry(now).await?,
            SweepKind::Survey => self.survey(now).await?,
            SweepKind::Reminders => self.reminders(now).await?,
        };
        info!(
            event_name = "scheduler.sweep_completed",
            sweep = sweep.as_str(),
            affected = report.affected,
            enqueued = report.enqueued,
            "sweep completed"
        );
        Ok(report)
    }

    /// Expires overdue invitations, then queues evaluation for enquiries with nothing pending.
    pub async fn bid_timeout(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let affected = self.ctx.repos.invitations.expire_overdue(now).await?;
        let mut enqueued = 0;
        for enquiry_id in &affected {
            if self.ctx.queue_bid_evaluation(enquiry_id).await? {
                enqueued += 1;
            }
        }
        Ok(SweepReport { sweep: SweepKind::BidTimeout, affected: affected.len() as u64, enqueued })
    }

    pub async fn quote_expiry(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let affected = self.ctx.repos.quotes.expire_overdue(now).await?;
        Ok(SweepReport { sweep: SweepKind::QuoteExpiry, affected, enqueued: 0 })
    }

    /// One feedback email per booking completed on the previous calendar day (UTC).
    pub async fn survey(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let (from, until, day) = previous_day(now);
        let bookings = self.ctx.repos.bookings.list_completed_between(from, until).await?;
        let mut enqueued = 0;

        for booking in &bookings {
            let Some(customer) = self.ctx.repos.customers.find_by_id(&booking.customer_id).await?
            else {
                continue;
            };
            let html = self.ctx.prompts.render_email(
                EmailTemplate::FeedbackSurvey,
                &json!({
                    "name": customer.name,
                    "reference": booking.reference,
                    "link": self.ctx.portal_link(&format!("feedback/{}", booking.id)),
                }),
            )?;
            let job = NewJob::send_email(SendEmailPayload {
                to: customer.email,
                subject: format!("How was your trip? ({})", booking.reference),
                html,
            })
            .with_dedupe_key(format!("survey:{}:{day}", booking.id));
            if self.ctx.enqueue(job).await?.is_some() {
                enqueued += 1;
            }
        }
        Ok(SweepReport { sweep: SweepKind::Survey, affected: bookings.len() as u64, enqueued })
    }

    /// Nudges suppliers that still owe a bid on enquiries sent out longer ago than the
    /// configured reminder age. At most one reminder per invitation per day.
    pub async fn reminders(&self, now: DateTime<Utc>) -> Result<SweepReport, PipelineError> {
        let cutoff = now - Duration::hours(i64::from(self.ctx.settings.reminder_age_hours));
        let enquiries = self.ctx.repos.enquiries.list_awaiting_bids(cutoff).await?;
        let today = now.date_naive();
        let mut enqueued = 0;

        for enquiry in &enquiries {
            let invitations = self.ctx.repos.invitations.list_for_enquiry(&enquiry.id).await?;
            for invitation in invitations
                .iter()
                .filter(|invitation| invitation.status == InvitationStatus::Pending)
            {
                let Some(supplier) =
                    self.ctx.repos.suppliers.find_by_id(&invitation.supplier_id).await?
                else {
                    continue;
                };
                let html = self.ctx.prompts.render_email(
                    EmailTemplate::BidReminder,
                    &json!({
                        "supplier": supplier.name,
                        "reference": enquiry.reference,
                        "pickup": enquiry.trip.pickup_location,
                        "dropoff": enquiry.trip.dropoff_location,
                        "deadline": format_date(Some(invitation.deadline)),
                        "link": self.ctx.portal_link(&format!("bids/{}", invitation.access_token)),
                    }),
                )?;
                let job = NewJob::send_email(SendEmailPayload {
                    to: supplier.contact_email,
                    subject: format!("Reminder: bid requested for {}", enquiry.reference),
                    html,
                })
                .with_dedupe_key(format!("reminder:{}:{today}", invitation.id));

                if self.ctx.enqueue(job).await?.is_some() {
                    self.ctx.repos.invitations.mark_reminded(&invitation.id, now).await?;
                    enqueued += 1;
                }
            }
        }
        Ok(SweepReport { sweep: SweepKind::Reminders, affected: enquiries.len() as u64, enqueued })
    }
}

/// `[yesterday 00:00, today 00:00)` in UTC, plus yesterday's date.
fn previous_day(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, NaiveDate) {
    let today = now.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    let start = |day: NaiveDate| day.and_time(chrono::NaiveTime::MIN).and_utc();
    (start(yesterday), start(today), yesterday)
}
