use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::BudgetMode;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub budget: BudgetConfig,
    pub workers: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// Static business parameters of the four pipeline stages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub currency: String,
    pub tax_rate: Decimal,
    pub quote_validity_days: u32,
    pub bid_window_hours: u32,
    pub reminder_age_hours: u32,
    pub markup_min_percent: Decimal,
    pub markup_max_percent: Decimal,
    pub max_suppliers: u32,
    /// Public base URL for supplier bid links and survey links in outgoing email
    pub portal_base_url: String,
}

#[derive(Clone, Debug)]
pub struct BudgetConfig {
    pub daily_default: Decimal,
    pub mode: BudgetMode,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub pipeline_workers: u32,
    pub notification_workers: u32,
    pub document_workers: u32,
    pub poll_interval_ms: u64,
    pub queue_max_retries: u32,
    pub queue_backoff_base_secs: u64,
    /// Where generated job sheets and driver briefings are written
    pub documents_dir: String,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub bid_timeout_interval_secs: u64,
    pub quote_expiry_interval_secs: u64,
    pub survey_interval_secs: u64,
    pub reminder_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub budget_mode: Option<BudgetMode>,
    pub scheduler_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://coachdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
                retry_base_delay_ms: 1000,
            },
            pipeline: PipelineConfig {
                currency: "GBP".to_string(),
                tax_rate: Decimal::new(20, 2),
                quote_validity_days: 7,
                bid_window_hours: 48,
                reminder_age_hours: 48,
                markup_min_percent: Decimal::new(15, 0),
                markup_max_percent: Decimal::new(35, 0),
                max_suppliers: 5,
                portal_base_url: "http://localhost:8080".to_string(),
            },
            budget: BudgetConfig { daily_default: Decimal::new(5000, 2), mode: BudgetMode::Advisory },
            workers: WorkerConfig {
                pipeline_workers: 4,
                notification_workers: 2,
                document_workers: 1,
                poll_interval_ms: 500,
                queue_max_retries: 5,
                queue_backoff_base_secs: 5,
                documents_dir: "data/documents".to_string(),
            },
            scheduler: SchedulerConfig {
                enabled: true,
                bid_timeout_interval_secs: 300,
                quote_expiry_interval_secs: 3600,
                survey_interval_secs: 86_400,
                reminder_interval_secs: 3600,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("coachdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = llm.retry_base_delay_ms {
                self.llm.retry_base_delay_ms = retry_base_delay_ms;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(currency) = pipeline.currency {
                self.pipeline.currency = currency;
            }
            if let Some(tax_rate) = pipeline.tax_rate {
                self.pipeline.tax_rate = tax_rate;
            }
            if let Some(days) = pipeline.quote_validity_days {
                self.pipeline.quote_validity_days = days;
            }
            if let Some(hours) = pipeline.bid_window_hours {
                self.pipeline.bid_window_hours = hours;
            }
            if let Some(hours) = pipeline.reminder_age_hours {
                self.pipeline.reminder_age_hours = hours;
            }
            if let Some(min) = pipeline.markup_min_percent {
                self.pipeline.markup_min_percent = min;
            }
            if let Some(max) = pipeline.markup_max_percent {
                self.pipeline.markup_max_percent = max;
            }
            if let Some(max_suppliers) = pipeline.max_suppliers {
                self.pipeline.max_suppliers = max_suppliers;
            }
            if let Some(portal_base_url) = pipeline.portal_base_url {
                self.pipeline.portal_base_url = portal_base_url;
            }
        }

        if let Some(budget) = patch.budget {
            if let Some(daily_default) = budget.daily_default {
                self.budget.daily_default = daily_default;
            }
            if let Some(mode) = budget.mode {
                self.budget.mode = mode;
            }
        }

        if let Some(workers) = patch.workers {
            if let Some(count) = workers.pipeline_workers {
                self.workers.pipeline_workers = count;
            }
            if let Some(count) = workers.notification_workers {
                self.workers.notification_workers = count;
            }
            if let Some(count) = workers.document_workers {
                self.workers.document_workers = count;
            }
            if let Some(poll_interval_ms) = workers.poll_interval_ms {
                self.workers.poll_interval_ms = poll_interval_ms;
            }
            if let Some(queue_max_retries) = workers.queue_max_retries {
                self.workers.queue_max_retries = queue_max_retries;
            }
            if let Some(secs) = workers.queue_backoff_base_secs {
                self.workers.queue_backoff_base_secs = secs;
            }
            if let Some(dir) = workers.documents_dir {
                self.workers.documents_dir = dir;
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(enabled) = scheduler.enabled {
                self.scheduler.enabled = enabled;
            }
            if let Some(secs) = scheduler.bid_timeout_interval_secs {
                self.scheduler.bid_timeout_interval_secs = secs;
            }
            if let Some(secs) = scheduler.quote_expiry_interval_secs {
                self.scheduler.quote_expiry_interval_secs = secs;
            }
            if let Some(secs) = scheduler.survey_interval_secs {
                self.scheduler.survey_interval_secs = secs;
            }
            if let Some(secs) = scheduler.reminder_interval_secs {
                self.scheduler.reminder_interval_secs = secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COACHDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COACHDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("COACHDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("COACHDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COACHDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("COACHDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COACHDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("COACHDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("COACHDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("COACHDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("COACHDESK_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_LLM_RETRY_BASE_DELAY_MS") {
            self.llm.retry_base_delay_ms = parse_env("COACHDESK_LLM_RETRY_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("COACHDESK_PIPELINE_TAX_RATE") {
            self.pipeline.tax_rate = parse_env("COACHDESK_PIPELINE_TAX_RATE", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_PIPELINE_BID_WINDOW_HOURS") {
            self.pipeline.bid_window_hours =
                parse_env("COACHDESK_PIPELINE_BID_WINDOW_HOURS", &value)?;
        }

        if let Some(value) = read_env("COACHDESK_PIPELINE_PORTAL_BASE_URL") {
            self.pipeline.portal_base_url = value;
        }

        if let Some(value) = read_env("COACHDESK_BUDGET_DAILY_DEFAULT") {
            self.budget.daily_default = parse_env("COACHDESK_BUDGET_DAILY_DEFAULT", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_BUDGET_MODE") {
            self.budget.mode = BudgetMode::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride { key: "COACHDESK_BUDGET_MODE".to_string(), value }
            })?;
        }

        if let Some(value) = read_env("COACHDESK_WORKERS_PIPELINE") {
            self.workers.pipeline_workers = parse_env("COACHDESK_WORKERS_PIPELINE", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_WORKERS_POLL_INTERVAL_MS") {
            self.workers.poll_interval_ms = parse_env("COACHDESK_WORKERS_POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = read_env("COACHDESK_SCHEDULER_ENABLED") {
            self.scheduler.enabled = parse_env("COACHDESK_SCHEDULER_ENABLED", &value)?;
        }

        if let Some(value) = read_env("COACHDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COACHDESK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_env("COACHDESK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("COACHDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("COACHDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("COACHDESK_LOGGING_LEVEL").or_else(|| read_env("COACHDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COACHDESK_LOGGING_FORMAT").or_else(|| read_env("COACHDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(budget_mode) = overrides.budget_mode {
            self.budget.mode = budget_mode;
        }
        if let Some(enabled) = overrides.scheduler_enabled {
            self.scheduler.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_pipeline(&self.pipeline)?;
        validate_budget(&self.budget)?;
        validate_workers(&self.workers)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("coachdesk.toml"), PathBuf::from("config/coachdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.tax_rate < Decimal::ZERO || pipeline.tax_rate >= Decimal::ONE {
        return Err(ConfigError::Validation(
            "pipeline.tax_rate must be a fraction in range 0..1 (e.g. 0.20)".to_string(),
        ));
    }

    if pipeline.markup_min_percent < Decimal::ZERO
        || pipeline.markup_min_percent > pipeline.markup_max_percent
    {
        return Err(ConfigError::Validation(
            "pipeline.markup_min_percent must be non-negative and not exceed markup_max_percent"
                .to_string(),
        ));
    }

    if pipeline.max_suppliers == 0 {
        return Err(ConfigError::Validation(
            "pipeline.max_suppliers must be greater than zero".to_string(),
        ));
    }

    if pipeline.quote_validity_days == 0 || pipeline.bid_window_hours == 0 {
        return Err(ConfigError::Validation(
            "pipeline.quote_validity_days and pipeline.bid_window_hours must be positive"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_budget(budget: &BudgetConfig) -> Result<(), ConfigError> {
    if budget.daily_default <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "budget.daily_default must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(workers: &WorkerConfig) -> Result<(), ConfigError> {
    if workers.pipeline_workers == 0
        || workers.notification_workers == 0
        || workers.document_workers == 0
    {
        return Err(ConfigError::Validation(
            "workers: every job category needs at least one worker".to_string(),
        ));
    }

    if workers.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "workers.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    pipeline: Option<PipelinePatch>,
    budget: Option<BudgetPatch>,
    workers: Option<WorkersPatch>,
    scheduler: Option<SchedulerPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    currency: Option<String>,
    tax_rate: Option<Decimal>,
    quote_validity_days: Option<u32>,
    bid_window_hours: Option<u32>,
    reminder_age_hours: Option<u32>,
    markup_min_percent: Option<Decimal>,
    markup_max_percent: Option<Decimal>,
    max_suppliers: Option<u32>,
    portal_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetPatch {
    daily_default: Option<Decimal>,
    mode: Option<BudgetMode>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkersPatch {
    pipeline_workers: Option<u32>,
    notification_workers: Option<u32>,
    document_workers: Option<u32>,
    poll_interval_ms: Option<u64>,
    queue_max_retries: Option<u32>,
    queue_backoff_base_secs: Option<u64>,
    documents_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    enabled: Option<bool>,
    bid_timeout_interval_secs: Option<u64>,
    quote_expiry_interval_secs: Option<u64>,
    survey_interval_secs: Option<u64>,
    reminder_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
