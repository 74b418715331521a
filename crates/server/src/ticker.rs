//! Runs each scheduler sweep on its own interval and hands stale queue claims back.

use std::time::Duration;

use chrono::Utc;
use coachdesk_agent::queue::JobQueue;
use coachdesk_agent::scheduler::{Scheduler, SweepKind};
use coachdesk_core::config::SchedulerConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const STALE_CLAIM_INTERVAL: Duration = Duration::from_secs(60);

pub fn sweep_interval(sweep: SweepKind, config: &SchedulerConfig) -> Duration {
    let secs = match sweep {
        SweepKind::BidTimeout => config.bid_timeout_interval_secs,
        SweepKind::QuoteExpiry => config.quote_expiry_interval_secs,
        SweepKind::Survey => config.survey_interval_secs,
        SweepKind::Reminders => config.reminder_interval_secs,
    };
    Duration::from_secs(secs.max(1))
}

pub fn spawn(
    scheduler: &Scheduler,
    queue: &JobQueue,
    config: &SchedulerConfig,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    if !config.enabled {
        info!(event_name = "system.scheduler.disabled", "scheduler disabled by configuration");
    } else {
        for sweep in SweepKind::ALL {
            let period = sweep_interval(sweep, config);
            info!(
                event_name = "system.scheduler.sweep_registered",
                sweep = sweep.as_str(),
                interval_secs = period.as_secs(),
                "sweep registered"
            );
            handles.push(tokio::spawn(run_sweep(scheduler.clone(), sweep, period, shutdown.clone())));
        }
    }

    handles.push(tokio::spawn(release_stale_claims(queue.clone(), shutdown.clone())));
    handles
}

async fn run_sweep(
    scheduler: Scheduler,
    sweep: SweepKind,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(error) = scheduler.run(sweep, Utc::now()).await {
                    error!(
                        event_name = "system.scheduler.sweep_failed",
                        sweep = sweep.as_str(),
                        error = %error,
                        "sweep failed; retrying next tick"
                    );
                }
            }
        }
    }
}

async fn release_stale_claims(queue: JobQueue, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(STALE_CLAIM_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(error) = queue.release_stale(Utc::now()).await {
                    warn!(
                        event_name = "system.scheduler.release_stale_failed",
                        error = %error,
                        "could not release stale job claims"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use coachdesk_agent::scheduler::SweepKind;
    use coachdesk_core::config::AppConfig;

    use super::sweep_interval;

    #[test]
    fn intervals_come_from_scheduler_config() {
        let mut config = AppConfig::default().scheduler;
        config.reminder_interval_secs = 0;

        assert_eq!(sweep_interval(SweepKind::BidTimeout, &config).as_secs(), 300);
        assert_eq!(sweep_interval(SweepKind::QuoteExpiry, &config).as_secs(), 3600);
        assert_eq!(sweep_interval(SweepKind::Survey, &config).as_secs(), 86_400);
        assert_eq!(sweep_interval(SweepKind::Reminders, &config).as_secs(), 1);
    }
}
