use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::decision::TokenUsage;

/// Billing rate for one model, in billing currency per million tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
}

impl ModelRate {
    pub const fn new(input_per_million: Decimal, output_per_million: Decimal) -> Self {
        Self { input_per_million, output_per_million }
    }

    /// `prompt_tokens * input_rate + completion_tokens * output_rate`, unrounded.
    pub fn cost_of(&self, usage: TokenUsage) -> Decimal {
        let per_token = Decimal::from(1_000_000u32);
        Decimal::from(usage.prompt_tokens) * self.input_per_million / per_token
            + Decimal::from(usage.completion_tokens) * self.output_per_million / per_token
    }
}

/// Static per-model price table. Lookup is by longest matching model-name prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelPriceTable {
    entries: Vec<(String, ModelRate)>,
    fallback: ModelRate,
}

impl ModelPriceTable {
    pub fn standard() -> Self {
        let entries = [
            ("gpt-4o-mini", Decimal::new(15, 2), Decimal::new(60, 2)),
            ("gpt-4o", Decimal::new(250, 2), Decimal::new(1000, 2)),
            ("gpt-4.1-mini", Decimal::new(40, 2), Decimal::new(160, 2)),
            ("gpt-4.1", Decimal::new(200, 2), Decimal::new(800, 2)),
            ("claude-3-5-haiku", Decimal::new(80, 2), Decimal::new(400, 2)),
            ("claude-3-5-sonnet", Decimal::new(300, 2), Decimal::new(1500, 2)),
            ("llama", Decimal::ZERO, Decimal::ZERO),
            ("mistral", Decimal::ZERO, Decimal::ZERO),
            ("qwen", Decimal::ZERO, Decimal::ZERO),
        ]
        .into_iter()
        .map(|(model, input, output)| (model.to_string(), ModelRate::new(input, output)))
        .collect();

        Self { entries, fallback: ModelRate::new(Decimal::new(250, 2), Decimal::new(1000, 2)) }
    }

    pub fn with_rate(mut self, model_prefix: impl Into<String>, rate: ModelRate) -> Self {
        self.entries.push((model_prefix.into(), rate));
        self
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        let model = model.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, rate)| *rate)
            .unwrap_or(self.fallback)
    }

    pub fn cost_of(&self, model: &str, usage: TokenUsage) -> Decimal {
        self.rate_for(model).cost_of(usage)
    }
}

impl Default for ModelPriceTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Signal only; calls continue past the daily budget
    Advisory,
    /// Refuse provider calls once the daily budget is exhausted
    Enforce,
}

impl BudgetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Enforce => "enforce",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Some(Self::Advisory),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Ok,
    Warning,
    Critical,
}

pub const WARNING_RATIO: Decimal = Decimal::from_parts(80, 0, 0, false, 2);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub provider: String,
    pub day: NaiveDate,
    pub spent: Decimal,
    pub budget: Decimal,
    pub level: BudgetLevel,
}

impl BudgetStatus {
    /// Warning at 80% of the budget, critical at 100%. A non-positive budget never trips.
    pub fn assess(provider: impl Into<String>, day: NaiveDate, spent: Decimal, budget: Decimal) -> Self {
        let level = if budget <= Decimal::ZERO {
            BudgetLevel::Ok
        } else if spent >= budget {
            BudgetLevel::Critical
        } else if spent >= budget * WARNING_RATIO {
            BudgetLevel::Warning
        } else {
            BudgetLevel::Ok
        };

        Self { provider: provider.into(), day, spent, budget, level }
    }

    pub fn blocks_calls(&self, mode: BudgetMode) -> bool {
        mode == BudgetMode::Enforce && self.level == BudgetLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
    }

    #[test]
    fn cost_follows_the_token_formula() {
        let table = ModelPriceTable::standard();
        let usage = TokenUsage { prompt_tokens: 1_000, completion_tokens: 500 };

        // 1000 * 2.50/1M + 500 * 10.00/1M
        assert_eq!(table.cost_of("gpt-4o", usage), Decimal::new(75, 4));
        // mini must not resolve to the gpt-4o prefix
        assert_eq!(table.cost_of("gpt-4o-mini-2024-07-18", usage), Decimal::new(45, 5));
        assert_eq!(table.cost_of("llama3.1", usage), Decimal::ZERO);
    }

    #[test]
    fn unknown_models_use_the_fallback_rate() {
        let table = ModelPriceTable::standard();
        let usage = TokenUsage { prompt_tokens: 1_000_000, completion_tokens: 0 };
        assert_eq!(table.cost_of("some-new-model", usage), Decimal::new(250, 2));

        let table = table.with_rate("some-new", ModelRate::new(Decimal::ONE, Decimal::ONE));
        assert_eq!(table.cost_of("some-new-model", usage), Decimal::ONE);
    }

    #[test]
    fn budget_levels_trip_at_eighty_and_hundred_percent() {
        let budget = Decimal::new(10, 0);
        let status = |spent| BudgetStatus::assess("openai", day(), spent, budget).level;

        assert_eq!(status(Decimal::new(79, 1)), BudgetLevel::Ok);
        assert_eq!(status(Decimal::new(8, 0)), BudgetLevel::Warning);
        assert_eq!(status(Decimal::new(999, 2)), BudgetLevel::Warning);
        assert_eq!(status(Decimal::new(10, 0)), BudgetLevel::Critical);
    }

    #[test]
    fn only_enforce_mode_blocks() {
        let status = BudgetStatus::assess("openai", day(), Decimal::new(12, 0), Decimal::new(10, 0));
        assert!(!status.blocks_calls(BudgetMode::Advisory));
        assert!(status.blocks_calls(BudgetMode::Enforce));

        let unbudgeted = BudgetStatus::assess("openai", day(), Decimal::new(12, 0), Decimal::ZERO);
        assert_eq!(unbudgeted.level, BudgetLevel::Ok);
    }
}
