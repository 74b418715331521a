pub mod bid;
pub mod config;
pub mod doctor;
pub mod intake;
pub mod migrate;
pub mod reviews;
pub mod spend;
pub mod sweep;

use std::future::Future;

use coachdesk_agent::llm::provider_from_config;
use coachdesk_agent::pipelines::PipelineContext;
use coachdesk_core::config::{AppConfig, LoadOptions};
use coachdesk_db::{connect_with_settings, migrations, DbPool, Repositories};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::ok(command, message.into(), None)
    }

    /// Success with a structured `data` payload alongside the message.
    pub fn success_with(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        let data = serde_json::to_value(data).ok();
        Self::ok(command, message.into(), data)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn ok(command: &str, message: String, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// A command failure before it is rendered: error class, message and exit code.
#[derive(Debug)]
pub(crate) struct Failure {
    class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    pub(crate) fn new(class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { class, message: message.into(), exit_code }
    }

    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Self::new("invalid_argument", message, 2)
    }

    pub(crate) fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class, self.message, self.exit_code)
    }
}

pub(crate) fn load_config() -> Result<AppConfig, Failure> {
    AppConfig::load(LoadOptions::default())
        .map_err(|error| Failure::new("config_validation", format!("configuration issue: {error}"), 2))
}

/// Runs `work` on a current-thread runtime, as every command that touches storage does.
pub(crate) fn block_on<F, T>(work: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, Failure>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            Failure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
        })?;
    runtime.block_on(work)
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
    Ok(pool)
}

/// Connected, migrated pipeline context backed by the configured database and provider.
pub(crate) async fn open_context(config: &AppConfig) -> Result<(DbPool, PipelineContext), Failure> {
    let pool = open_pool(config).await?;
    let provider = provider_from_config(&config.llm)
        .map_err(|error| Failure::new("provider_config", error.to_string(), 2))?;
    let context = PipelineContext::new(Repositories::sql(pool.clone()), provider, config)
        .map_err(|error| Failure::new("prompt_templates", error.to_string(), 6))?;
    Ok((pool, context))
}

pub(crate) fn storage_failure(error: impl std::fmt::Display) -> Failure {
    Failure::new("storage", error.to_string(), 6)
}
