use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use coachdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One effective setting: dotted key, rendered value and the env var that can override it.
struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

fn entry(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Entry {
    Entry { key, value: value.to_string(), env_key }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source =
            field_source(entry.key, entry.env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(entry.key, &entry.value, source));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_secret(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        entry("database.url", &config.database.url, Some("COACHDESK_DATABASE_URL")),
        entry(
            "database.max_connections",
            config.database.max_connections,
            Some("COACHDESK_DATABASE_MAX_CONNECTIONS"),
        ),
        entry("database.timeout_secs", config.database.timeout_secs, Some("COACHDESK_DATABASE_TIMEOUT_SECS")),
        entry("llm.provider", config.llm.provider.as_str(), Some("COACHDESK_LLM_PROVIDER")),
        entry("llm.model", &config.llm.model, Some("COACHDESK_LLM_MODEL")),
        entry(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            Some("COACHDESK_LLM_BASE_URL"),
        ),
        entry("llm.api_key", api_key, Some("COACHDESK_LLM_API_KEY")),
        entry("llm.timeout_secs", config.llm.timeout_secs, Some("COACHDESK_LLM_TIMEOUT_SECS")),
        entry("llm.max_retries", config.llm.max_retries, Some("COACHDESK_LLM_MAX_RETRIES")),
        entry(
            "llm.retry_base_delay_ms",
            config.llm.retry_base_delay_ms,
            Some("COACHDESK_LLM_RETRY_BASE_DELAY_MS"),
        ),
        entry("pipeline.currency", &config.pipeline.currency, None),
        entry("pipeline.tax_rate", config.pipeline.tax_rate, Some("COACHDESK_PIPELINE_TAX_RATE")),
        entry("pipeline.quote_validity_days", config.pipeline.quote_validity_days, None),
        entry(
            "pipeline.bid_window_hours",
            config.pipeline.bid_window_hours,
            Some("COACHDESK_PIPELINE_BID_WINDOW_HOURS"),
        ),
        entry("pipeline.reminder_age_hours", config.pipeline.reminder_age_hours, None),
        entry("pipeline.markup_min_percent", config.pipeline.markup_min_percent, None),
        entry("pipeline.markup_max_percent", config.pipeline.markup_max_percent, None),
        entry("pipeline.max_suppliers", config.pipeline.max_suppliers, None),
        entry(
            "pipeline.portal_base_url",
            &config.pipeline.portal_base_url,
            Some("COACHDESK_PIPELINE_PORTAL_BASE_URL"),
        ),
        entry("budget.daily_default", config.budget.daily_default, Some("COACHDESK_BUDGET_DAILY_DEFAULT")),
        entry("budget.mode", format!("{:?}", config.budget.mode), Some("COACHDESK_BUDGET_MODE")),
        entry("workers.pipeline_workers", config.workers.pipeline_workers, Some("COACHDESK_WORKERS_PIPELINE")),
        entry("workers.notification_workers", config.workers.notification_workers, None),
        entry("workers.document_workers", config.workers.document_workers, None),
        entry(
            "workers.poll_interval_ms",
            config.workers.poll_interval_ms,
            Some("COACHDESK_WORKERS_POLL_INTERVAL_MS"),
        ),
        entry("workers.queue_max_retries", config.workers.queue_max_retries, None),
        entry("workers.documents_dir", &config.workers.documents_dir, None),
        entry("scheduler.enabled", config.scheduler.enabled, Some("COACHDESK_SCHEDULER_ENABLED")),
        entry("server.bind_address", &config.server.bind_address, Some("COACHDESK_SERVER_BIND_ADDRESS")),
        entry(
            "server.health_check_port",
            config.server.health_check_port,
            Some("COACHDESK_SERVER_HEALTH_CHECK_PORT"),
        ),
        entry("logging.level", &config.logging.level, Some("COACHDESK_LOGGING_LEVEL")),
        entry("logging.format", format!("{:?}", config.logging.format), Some("COACHDESK_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("coachdesk.toml"), PathBuf::from("config/coachdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable prefix (`sk-`, `sk-proj-`) and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.rsplit_once('-') {
        Some((prefix, _)) if prefix.len() <= 8 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
