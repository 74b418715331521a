mod bootstrap;
mod health;
mod ticker;
mod workers;

use std::time::Duration;

use anyhow::Result;
use coachdesk_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use coachdesk_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.db_pool.clone(), app.dispatcher.context().repos.jobs.clone()),
    )
    .await?;

    let (stop, shutdown) = watch::channel(false);
    let mut handles = workers::spawn_pools(&app.dispatcher, &app.config.workers, &shutdown);
    handles.extend(ticker::spawn(
        &app.scheduler,
        &app.dispatcher.context().queue,
        &app.config.scheduler,
        &shutdown,
    ));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        tasks = handles.len(),
        "coachdesk-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "coachdesk-server stopping"
    );

    // Running jobs finish; anything still claimed after the grace period is released by
    // the next start's stale-claim sweep.
    let _ = stop.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        for handle in handles {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "workers did not stop within the grace period"
        );
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
