//! Fixed-size worker pools, one per job category, polling the durable queue.

use std::time::Duration;

use coachdesk_agent::runtime::JobDispatcher;
use coachdesk_core::config::WorkerConfig;
use coachdesk_core::domain::job::JobCategory;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub fn pool_sizes(config: &WorkerConfig) -> [(JobCategory, u32); 3] {
    [
        (JobCategory::Pipeline, config.pipeline_workers),
        (JobCategory::Notification, config.notification_workers),
        (JobCategory::Document, config.document_workers),
    ]
}

pub fn spawn_pools(
    dispatcher: &JobDispatcher,
    config: &WorkerConfig,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));
    let mut handles = Vec::new();

    for (category, size) in pool_sizes(config) {
        for index in 0..size {
            let worker_id = format!("{}-{index}", category.as_str());
            handles.push(tokio::spawn(run_worker(
                dispatcher.clone(),
                category,
                worker_id,
                poll,
                shutdown.clone(),
            )));
        }
        info!(
            event_name = "system.workers.pool_started",
            category = category.as_str(),
            size,
            "worker pool started"
        );
    }
    handles
}

/// Drains jobs back to back and sleeps `poll` only when the queue is empty.
async fn run_worker(
    dispatcher: JobDispatcher,
    category: JobCategory,
    worker_id: String,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match dispatcher.run_next(category, &worker_id).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(error) => {
                error!(
                    event_name = "system.workers.queue_error",
                    category = category.as_str(),
                    worker_id = %worker_id,
                    error = %error,
                    "worker could not talk to the job queue"
                );
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll) => {}
        }
    }

    info!(
        event_name = "system.workers.stopped",
        category = category.as_str(),
        worker_id = %worker_id,
        "worker stopped"
    );
}
