use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, warn};

use coachdesk_core::config::BudgetConfig;
use coachdesk_core::cost::{BudgetLevel, BudgetMode, BudgetStatus, ModelPriceTable};
use coachdesk_core::domain::decision::{
    CostRecord, CostRecordId, DecisionLogId, DecisionType, TokenUsage,
};
use coachdesk_db::repositories::{CostRepository, RepositoryError, SettingsRepository, SpendLine};

pub const BUDGET_SETTING_KEY: &str = "budget.daily";

pub fn provider_budget_key(provider: &str) -> String {
    format!("{BUDGET_SETTING_KEY}.{provider}")
}

/// One successful provider call, as handed to the tracker by the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostInput {
    pub decision_type: DecisionType,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub decision_log_id: Option<DecisionLogId>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpendReport {
    pub day: NaiveDate,
    pub total: Decimal,
    pub lines: Vec<SpendLine>,
}

/// Persists per-call cost and checks the day's provider spend against its budget.
pub struct CostTracker {
    costs: Arc<dyn CostRepository>,
    settings: Arc<dyn SettingsRepository>,
    prices: ModelPriceTable,
    default_budget: Decimal,
    mode: BudgetMode,
}

impl CostTracker {
    pub fn new(
        costs: Arc<dyn CostRepository>,
        settings: Arc<dyn SettingsRepository>,
        budget: &BudgetConfig,
    ) -> Self {
        Self {
            costs,
            settings,
            prices: ModelPriceTable::standard(),
            default_budget: budget.daily_default,
            mode: budget.mode,
        }
    }

    pub fn with_prices(mut self, prices: ModelPriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn mode(&self) -> BudgetMode {
        self.mode
    }

    pub fn cost_of(&self, model: &str, usage: TokenUsage) -> Decimal {
        self.prices.cost_of(model, usage)
    }

    /// Writes the cost record, then re-reads the day's aggregate spend for the provider.
    pub async fn record(&self, input: CostInput) -> Result<BudgetStatus, RepositoryError> {
        let day = input.at.date_naive();
        let record = CostRecord {
            id: CostRecordId::generate(),
            day,
            decision_type: input.decision_type,
            provider: input.provider.clone(),
            model: input.model.clone(),
            usage: input.usage,
            cost: self.cost_of(&input.model, input.usage),
            decision_log_id: input.decision_log_id,
            created_at: input.at,
        };
        self.costs.record(record).await?;

        let status = self.status(&input.provider, day).await?;
        signal(&status);
        Ok(status)
    }

    pub async fn status(&self, provider: &str, day: NaiveDate) -> Result<BudgetStatus, RepositoryError> {
        let spent = self.costs.daily_spend(provider, day).await?;
        let budget = self.daily_budget(provider).await;
        Ok(BudgetStatus::assess(provider, day, spent, budget))
    }

    /// `budget.daily.<provider>`, then `budget.daily`, then the configured default.
    /// Unreadable or unparsable values fall through to the next source.
    pub async fn daily_budget(&self, provider: &str) -> Decimal {
        for key in [provider_budget_key(provider), BUDGET_SETTING_KEY.to_string()] {
            if let Ok(Some(value)) = self.settings.get(&key).await {
                if let Ok(budget) = Decimal::from_str(value.trim()) {
                    return budget;
                }
            }
        }
        self.default_budget
    }

    pub async fn spend_report(&self, day: NaiveDate) -> Result<SpendReport, RepositoryError> {
        let lines = self.costs.daily_breakdown(day).await?;
        let total = lines.iter().map(|line| line.cost).sum();
        Ok(SpendReport { day, total, lines })
    }
}

fn signal(status: &BudgetStatus) {
    match status.level {
        BudgetLevel::Ok => {}
        BudgetLevel::Warning => warn!(
            event_name = "budget.warning",
            provider = %status.provider,
            spent = %status.spent,
            budget = %status.budget,
            "daily AI spend passed 80% of budget"
        ),
        BudgetLevel::Critical => error!(
            event_name = "budget.critical",
            provider = %status.provider,
            spent = %status.spent,
            budget = %status.budget,
            "daily AI spend reached budget"
        ),
    }
}
