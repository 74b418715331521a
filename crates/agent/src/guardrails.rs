//! Deterministic checks applied to AI recommendations before a pipeline commits them.

use rust_decimal::Decimal;

use coachdesk_core::domain::review::ReviewReason;
use coachdesk_core::domain::supplier::{SupplierOrganisation, RELIABILITY_FLOOR};
use coachdesk_core::pricing::MarkupBounds;
use coachdesk_core::thresholds::ConfidenceVerdict;

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailIntent {
    /// Apply the bid evaluator's recommended winner.
    AwardBid {
        verdict: ConfidenceVerdict,
        anomalous_bid_ids: Vec<String>,
        low_rated_supplier_ids: Vec<String>,
        winner_found: bool,
    },
    /// Apply a model-recommended markup percentage.
    ApplyMarkup { recommended_percent: f64, bounds: MarkupBounds },
}

impl GuardrailIntent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::AwardBid { .. } => "bids.award",
            Self::ApplyMarkup { .. } => "pricing.apply_markup",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Allow,
    /// Proceed with a corrected value.
    Adjust { reason_code: &'static str, applied: Decimal },
    /// Stop and hand the decision to a reviewer.
    Escalate { reason: ReviewReason, reason_code: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailPolicy {
    pub reliability_floor: f64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { reliability_floor: RELIABILITY_FLOOR }
    }
}

impl GuardrailPolicy {
    /// Ids of suppliers whose known rating sits strictly below the floor. Unrated suppliers
    /// do not count as low rated.
    pub fn low_rated<'a>(
        &self,
        suppliers: impl IntoIterator<Item = &'a SupplierOrganisation>,
    ) -> Vec<String> {
        suppliers
            .into_iter()
            .filter(|supplier| supplier.rated_below(self.reliability_floor))
            .map(|supplier| supplier.id.to_string())
            .collect()
    }

    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            GuardrailIntent::AwardBid { verdict, .. } if !verdict.auto_executed => {
                GuardrailDecision::Escalate {
                    reason: ReviewReason::LowConfidence,
                    reason_code: "bid_evaluation_low_confidence",
                    message: verdict
                        .escalation_reason()
                        .unwrap_or_else(|| "confidence below threshold".to_string()),
                }
            }
            GuardrailIntent::AwardBid { anomalous_bid_ids, .. } if !anomalous_bid_ids.is_empty() => {
                GuardrailDecision::Escalate {
                    reason: ReviewReason::AnomalousPricing,
                    reason_code: "bid_pricing_anomaly",
                    message: format!("pricing anomalies reported for {}", anomalous_bid_ids.join(", ")),
                }
            }
            GuardrailIntent::AwardBid { low_rated_supplier_ids, .. }
                if !low_rated_supplier_ids.is_empty() =>
            {
                GuardrailDecision::Escalate {
                    reason: ReviewReason::LowSupplierRating,
                    reason_code: "supplier_below_reliability_floor",
                    message: format!(
                        "suppliers rated below {:.1}: {}",
                        self.reliability_floor,
                        low_rated_supplier_ids.join(", ")
                    ),
                }
            }
            GuardrailIntent::AwardBid { winner_found: false, .. } => GuardrailDecision::Escalate {
                reason: ReviewReason::AiFailure,
                reason_code: "recommended_bid_missing",
                message: "recommended bid is not among the submitted bids".to_string(),
            },
            GuardrailIntent::AwardBid { .. } => GuardrailDecision::Allow,
            GuardrailIntent::ApplyMarkup { recommended_percent, bounds } => {
                let applied = bounds.clamp_recommendation(*recommended_percent);
                let within = Decimal::try_from(*recommended_percent)
                    .map(|requested| requested == applied)
                    .unwrap_or(false);
                if within {
                    GuardrailDecision::Allow
                } else {
                    GuardrailDecision::Adjust { reason_code: "markup_clamped", applied }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use coachdesk_core::domain::review::ReviewReason;
    use coachdesk_core::domain::supplier::{SupplierId, SupplierOrganisation};
    use coachdesk_core::pricing::MarkupBounds;
    use coachdesk_core::thresholds::gate;

    use super::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

    fn award(confidence: f64, anomalies: &[&str], low_rated: &[&str], found: bool) -> GuardrailIntent {
        GuardrailIntent::AwardBid {
            verdict: gate(confidence, 0.80),
            anomalous_bid_ids: anomalies.iter().map(|id| id.to_string()).collect(),
            low_rated_supplier_ids: low_rated.iter().map(|id| id.to_string()).collect(),
            winner_found: found,
        }
    }

    fn reason(decision: GuardrailDecision) -> Option<ReviewReason> {
        match decision {
            GuardrailDecision::Escalate { reason, .. } => Some(reason),
            _ => None,
        }
    }

    #[test]
    fn confident_clean_award_is_allowed() {
        let policy = GuardrailPolicy::default();
        assert_eq!(policy.evaluate(&award(0.92, &[], &[], true)), GuardrailDecision::Allow);
    }

    #[test]
    fn escalation_reasons_follow_precedence() {
        let policy = GuardrailPolicy::default();
        assert_eq!(
            reason(policy.evaluate(&award(0.5, &["bid-1"], &["sup-1"], false))),
            Some(ReviewReason::LowConfidence)
        );
        assert_eq!(
            reason(policy.evaluate(&award(0.9, &["bid-1"], &["sup-1"], false))),
            Some(ReviewReason::AnomalousPricing)
        );
        assert_eq!(
            reason(policy.evaluate(&award(0.95, &[], &["sup-1"], true))),
            Some(ReviewReason::LowSupplierRating)
        );
        assert_eq!(
            reason(policy.evaluate(&award(0.95, &[], &[], false))),
            Some(ReviewReason::AiFailure)
        );
    }

    #[test]
    fn unrated_suppliers_are_not_low_rated() {
        let supplier = |id: &str, rating: Option<f64>| SupplierOrganisation {
            id: SupplierId::from(id),
            name: id.to_string(),
            contact_email: format!("{id}@example.com"),
            rating,
            active: true,
            fleet_size: 4,
            vehicle_types: vec!["coach".to_string()],
            completed_jobs: 10,
            response_rate: None,
        };
        let suppliers =
            [supplier("sup-a", Some(4.6)), supplier("sup-b", Some(2.4)), supplier("sup-c", None)];

        assert_eq!(GuardrailPolicy::default().low_rated(&suppliers), vec!["sup-b".to_string()]);
    }

    #[test]
    fn markup_outside_bounds_is_adjusted() {
        let policy = GuardrailPolicy::default();
        let bounds = MarkupBounds::new(Decimal::new(15, 0), Decimal::new(35, 0));

        assert_eq!(
            policy.evaluate(&GuardrailIntent::ApplyMarkup { recommended_percent: 50.0, bounds }),
            GuardrailDecision::Adjust { reason_code: "markup_clamped", applied: Decimal::new(35, 0) }
        );
        assert_eq!(
            policy.evaluate(&GuardrailIntent::ApplyMarkup { recommended_percent: 25.0, bounds }),
            GuardrailDecision::Allow
        );
    }
}
