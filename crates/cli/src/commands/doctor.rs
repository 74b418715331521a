use chrono::Utc;
use coachdesk_agent::cost::CostTracker;
use coachdesk_agent::llm::provider_from_config;
use coachdesk_core::config::{AppConfig, LlmProvider, LoadOptions};
use coachdesk_core::cost::BudgetLevel;
use coachdesk_core::domain::job::JobState;
use coachdesk_db::{connect_with_settings, migrations, Repositories};
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {reason}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_provider_readiness(&config));
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["provider_readiness", "database_connectivity", "job_queue", "budget_status"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready, with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_provider_readiness(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    if llm.provider == LlmProvider::OpenAi
        && llm.api_key.as_ref().map_or(true, |key| key.expose_secret().trim().is_empty())
    {
        return DoctorCheck::new(
            "provider_readiness",
            CheckStatus::Fail,
            "openai provider selected but COACHDESK_LLM_API_KEY is not set",
        );
    }

    match provider_from_config(llm) {
        Ok(_) => DoctorCheck::new(
            "provider_readiness",
            CheckStatus::Pass,
            format!(
                "{} model `{}` at {}",
                llm.provider.as_str(),
                llm.model,
                llm.base_url.as_deref().unwrap_or("the provider default endpoint")
            ),
        ),
        Err(error) => DoctorCheck::new("provider_readiness", CheckStatus::Fail, error.to_string()),
    }
}

/// Connectivity, migrations, queue depth and today's spend share one connection.
fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("job_queue", "the runtime did not start"),
                DoctorCheck::skipped("budget_status", "the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("job_queue", "the database is unreachable"),
                    DoctorCheck::skipped("budget_status", "the database is unreachable"),
                ];
            }
        };

        if let Err(error) = migrations::run_pending(&pool).await {
            pool.close().await;
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("connected but migrations failed: {error}"),
                ),
                DoctorCheck::skipped("job_queue", "the schema is not current"),
                DoctorCheck::skipped("budget_status", "the schema is not current"),
            ];
        }

        let repos = Repositories::sql(pool.clone());
        let checks = vec![
            DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Pass,
                format!("connected using `{}`, schema current", config.database.url),
            ),
            check_job_queue(&repos).await,
            check_budget(&repos, config).await,
        ];
        pool.close().await;
        checks
    })
}

async fn check_job_queue(repos: &Repositories) -> DoctorCheck {
    let queued = repos.jobs.list_by_state(JobState::Queued).await;
    let dead = repos.jobs.list_by_state(JobState::FailedTerminal).await;
    match (queued, dead) {
        (Ok(queued), Ok(dead)) => {
            let status = if dead.is_empty() { CheckStatus::Pass } else { CheckStatus::Warn };
            DoctorCheck::new(
                "job_queue",
                status,
                format!("{} queued, {} failed terminally", queued.len(), dead.len()),
            )
        }
        (Err(error), _) | (_, Err(error)) => {
            DoctorCheck::new("job_queue", CheckStatus::Fail, error.to_string())
        }
    }
}

async fn check_budget(repos: &Repositories, config: &AppConfig) -> DoctorCheck {
    let tracker = CostTracker::new(repos.costs.clone(), repos.settings.clone(), &config.budget);
    match tracker.status(config.llm.provider.as_str(), Utc::now().date_naive()).await {
        Ok(status) => {
            let check_status = match status.level {
                BudgetLevel::Ok => CheckStatus::Pass,
                BudgetLevel::Warning | BudgetLevel::Critical => CheckStatus::Warn,
            };
            DoctorCheck::new(
                "budget_status",
                check_status,
                format!(
                    "{} spent {} of {} today ({:?}, {:?} mode)",
                    status.provider, status.spent, status.budget, status.level, config.budget.mode
                ),
            )
        }
        Err(error) => DoctorCheck::new("budget_status", CheckStatus::Fail, error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
