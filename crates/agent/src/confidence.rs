use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use coachdesk_core::domain::decision::DecisionType;
use coachdesk_core::thresholds::{ConfidenceVerdict, ThresholdTable, THRESHOLD_SETTING_PREFIX};
use coachdesk_db::repositories::SettingsRepository;

pub const THRESHOLD_CACHE_TTL: Duration = Duration::from_secs(300);

/// Confidence gate with threshold overrides read from settings and cached for a bounded TTL.
///
/// A failed settings read yields the defaults for that window instead of an error: the
/// gate must never be the reason a decision cannot be evaluated.
pub struct ConfidenceEvaluator {
    settings: Arc<dyn SettingsRepository>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, ThresholdTable)>>,
}

impl ConfidenceEvaluator {
    pub fn new(settings: Arc<dyn SettingsRepository>) -> Self {
        Self::with_ttl(settings, THRESHOLD_CACHE_TTL)
    }

    pub fn with_ttl(settings: Arc<dyn SettingsRepository>, ttl: Duration) -> Self {
        Self { settings, ttl, cached: Mutex::new(None) }
    }

    pub async fn evaluate(&self, decision_type: DecisionType, confidence: f64) -> ConfidenceVerdict {
        self.thresholds().await.evaluate(decision_type, confidence)
    }

    pub async fn thresholds(&self) -> ThresholdTable {
        if let Some(table) = self.fresh_cached() {
            return table;
        }

        let table = match self.settings.list().await {
            Ok(rows) => ThresholdTable::from_settings(
                rows.iter()
                    .filter(|(key, _)| key.starts_with(THRESHOLD_SETTING_PREFIX))
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            ),
            Err(error) => {
                debug!(
                    event_name = "confidence.thresholds_fallback",
                    error = %error,
                    "threshold overrides unavailable, using defaults"
                );
                ThresholdTable::defaults()
            }
        };

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((Instant::now(), table.clone()));
        }
        table
    }

    /// Drops the cached table so the next evaluation re-reads settings.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn fresh_cached(&self) -> Option<ThresholdTable> {
        let cached = self.cached.lock().ok()?;
        let (loaded_at, table) = cached.as_ref()?;
        (loaded_at.elapsed() < self.ttl).then(|| table.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use coachdesk_core::domain::decision::DecisionType;
    use coachdesk_db::repositories::{InMemoryStore, RepositoryError, SettingsRepository};

    use super::ConfidenceEvaluator;

    struct BrokenSettings;

    #[async_trait]
    impl SettingsRepository for BrokenSettings {
        async fn get(&self, _key: &str) -> Result<Option<String>, RepositoryError> {
            Err(RepositoryError::Decode("settings table unavailable".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("settings table unavailable".to_string()))
        }

        async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError> {
            Err(RepositoryError::Decode("settings table unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn overrides_are_cached_until_invalidated() {
        let store = Arc::new(InMemoryStore::default());
        store.set("confidence_threshold.bid_evaluation", "0.9").await.expect("seed");
        let evaluator = ConfidenceEvaluator::new(store.clone());

        assert!(!evaluator.evaluate(DecisionType::BidEvaluation, 0.85).await.auto_executed);

        store.set("confidence_threshold.bid_evaluation", "0.5").await.expect("update");
        assert!(
            !evaluator.evaluate(DecisionType::BidEvaluation, 0.85).await.auto_executed,
            "cached table still applies"
        );

        evaluator.invalidate();
        assert!(evaluator.evaluate(DecisionType::BidEvaluation, 0.85).await.auto_executed);
    }

    #[tokio::test]
    async fn expired_cache_reloads() {
        let store = Arc::new(InMemoryStore::default());
        let evaluator = ConfidenceEvaluator::with_ttl(store.clone(), Duration::ZERO);

        assert_eq!(evaluator.thresholds().await.threshold_for(DecisionType::QuoteContent), 0.5);
        store.set("confidence_threshold.quote_content", "0.65").await.expect("update");
        assert_eq!(evaluator.thresholds().await.threshold_for(DecisionType::QuoteContent), 0.65);
    }

    #[tokio::test]
    async fn unreadable_settings_fall_back_to_defaults() {
        let evaluator = ConfidenceEvaluator::new(Arc::new(BrokenSettings));
        let verdict = evaluator.evaluate(DecisionType::EmailParse, 0.75).await;
        assert!(verdict.auto_executed);
        assert_eq!(verdict.threshold, 0.75);
    }
}
