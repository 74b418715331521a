use std::sync::Arc;

use coachdesk_agent::llm::{provider_from_config, ProviderError};
use coachdesk_agent::pipelines::PipelineContext;
use coachdesk_agent::prompts::PromptError;
use coachdesk_agent::runtime::{FileDocumentSink, JobDispatcher, LoggingNotificationSink};
use coachdesk_agent::scheduler::Scheduler;
use coachdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use coachdesk_db::{connect_with_settings, migrations, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: JobDispatcher,
    pub scheduler: Scheduler,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("inference provider could not be built: {0}")]
    Provider(#[source] ProviderError),
    #[error("prompt templates failed to load: {0}")]
    Prompts(#[source] PromptError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let provider = provider_from_config(&config.llm).map_err(BootstrapError::Provider)?;
    let context = PipelineContext::new(Repositories::sql(db_pool.clone()), provider, &config)
        .map_err(BootstrapError::Prompts)?;
    let context = Arc::new(context);

    let dispatcher = JobDispatcher::new(
        context.clone(),
        Arc::new(LoggingNotificationSink),
        Arc::new(FileDocumentSink::new(&config.workers.documents_dir)),
    );

    Ok(Application { scheduler: Scheduler::new(context), dispatcher, config, db_pool })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use coachdesk_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_when_required_config_file_is_missing() {
        let result = bootstrap(LoadOptions {
            config_path: Some(PathBuf::from("/definitely/not/here/coachdesk.toml")),
            require_file: true,
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_pipeline() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                scheduler_enabled: Some(false),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('enquiry', 'decision_log', 'human_review_task', 'job')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("pipeline tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        assert!(!app.config.scheduler.enabled);
        let pending = app.dispatcher.context().repos.reviews.list_pending(10).await.expect("reviews");
        assert!(pending.is_empty());

        app.db_pool.close().await;
    }
}
