use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::decision::{DecisionAction, DecisionType};

pub const THRESHOLD_SETTING_PREFIX: &str = "confidence_threshold.";

pub fn default_threshold(decision_type: DecisionType) -> f64 {
    match decision_type {
        DecisionType::EmailParse => 0.75,
        DecisionType::EnquiryAnalysis => 0.60,
        DecisionType::SupplierSelection => 0.70,
        DecisionType::BidEvaluation => 0.80,
        DecisionType::MarkupCalculation => 0.70,
        DecisionType::QuoteContent => 0.50,
        DecisionType::JobDocuments => 0.50,
        DecisionType::EmailPersonalization => 0.50,
    }
}

pub fn threshold_setting_key(decision_type: DecisionType) -> String {
    format!("{THRESHOLD_SETTING_PREFIX}{}", decision_type.as_str())
}

/// Effective thresholds: defaults overlaid with whatever overrides parsed cleanly.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThresholdTable {
    overrides: HashMap<DecisionType, f64>,
}

impl ThresholdTable {
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Builds a table from raw setting rows. Unknown keys and unparsable or out-of-range
    /// values are skipped so the affected decision type keeps its default.
    pub fn from_settings<'a>(settings: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let overrides = settings
            .into_iter()
            .filter_map(|(key, value)| {
                let decision_type =
                    DecisionType::parse(key.strip_prefix(THRESHOLD_SETTING_PREFIX)?)?;
                let threshold = value.trim().parse::<f64>().ok()?;
                (threshold.is_finite() && (0.0..=1.0).contains(&threshold))
                    .then_some((decision_type, threshold))
            })
            .collect();

        Self { overrides }
    }

    pub fn with_override(mut self, decision_type: DecisionType, threshold: f64) -> Self {
        self.overrides.insert(decision_type, threshold.clamp(0.0, 1.0));
        self
    }

    pub fn threshold_for(&self, decision_type: DecisionType) -> f64 {
        self.overrides
            .get(&decision_type)
            .copied()
            .unwrap_or_else(|| default_threshold(decision_type))
    }

    pub fn evaluate(&self, decision_type: DecisionType, confidence: f64) -> ConfidenceVerdict {
        gate(confidence, self.threshold_for(decision_type))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceVerdict {
    pub auto_executed: bool,
    pub action: DecisionAction,
    pub confidence: f64,
    pub threshold: f64,
}

impl ConfidenceVerdict {
    pub fn escalation_reason(&self) -> Option<String> {
        (!self.auto_executed).then(|| {
            format!("confidence {:.2} below threshold {:.2}", self.confidence, self.threshold)
        })
    }

    /// Action and reason recorded in the decision log. A low-confidence output of a type
    /// that never opens a review is logged as committed, with the shortfall in the reason.
    pub fn log_disposition(&self, decision_type: DecisionType) -> (DecisionAction, Option<String>) {
        match self.escalation_reason() {
            Some(reason) if !decision_type.escalates_on_low_confidence() => {
                (DecisionAction::AutoExecuted, Some(format!("{reason}; committed by policy")))
            }
            reason => (self.action, reason),
        }
    }
}

/// Inclusive gate: a confidence equal to the threshold auto-executes.
pub fn gate(confidence: f64, threshold: f64) -> ConfidenceVerdict {
    let confidence = clamp_confidence(confidence);
    let auto_executed = confidence >= threshold;
    let action =
        if auto_executed { DecisionAction::AutoExecuted } else { DecisionAction::EscalatedToHuman };

    ConfidenceVerdict { auto_executed, action, confidence, threshold }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Reads the self-reported confidence from a structured provider response.
/// Accepts `confidence_score`, `confidenceScore` or `confidence`; absent means 1.0.
pub fn extract_confidence(output: &serde_json::Value) -> f64 {
    ["confidence_score", "confidenceScore", "confidence"]
        .iter()
        .find_map(|key| output.get(*key))
        .map(|value| match value {
            serde_json::Value::Number(number) => number.as_f64().unwrap_or(0.0),
            serde_json::Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        })
        .map(clamp_confidence)
        .unwrap_or(1.0)
}
