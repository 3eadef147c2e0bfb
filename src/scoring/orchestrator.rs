//! Scoring fan-out and aggregation

use crate::model::listing::Listing;
use crate::model::risk::{RiskLevel, RiskSignal};
use crate::plugin::api::SharedPluginRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// One plugin's contribution to the aggregate, for the explainable breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct PluginScore {
    pub plugin_id: String,
    /// Plugin-level score in [0,1]
    pub score: f64,
    /// Normalized weight actually used in the aggregate
    pub weight: f64,
    pub confidence: f64,
    pub signal_count: usize,
}

/// Final scoring outcome for one listing.
#[derive(Debug, Clone, Serialize)]
pub struct FraudScore {
    pub listing_id: String,
    /// Aggregated fraud score, 0 (clean) to 100 (fraud)
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    /// Signals at or above the confidence threshold, in plugin-id order
    pub signals: Vec<RiskSignal>,
    /// Per-plugin breakdown of the aggregate
    pub plugin_scores: Vec<PluginScore>,
    pub plugins_executed: usize,
    pub processing_time_ms: f64,
}

impl FraudScore {
    fn empty(listing_id: String, elapsed_ms: f64) -> Self {
        Self {
            listing_id,
            fraud_score: 0.0,
            risk_level: RiskLevel::Safe,
            confidence: 0.0,
            signals: Vec::new(),
            plugin_scores: Vec::new(),
            plugins_executed: 0,
            processing_time_ms: elapsed_ms,
        }
    }

    /// Plugins whose own score crossed into suspicious territory; used for
    /// the `detected_by` field on fraud alerts.
    pub fn detected_by(&self) -> Vec<String> {
        self.plugin_scores
            .iter()
            .filter(|p| p.score >= 0.3)
            .map(|p| p.plugin_id.clone())
            .collect()
    }
}

/// Orchestrates the detection plugin fan-out.
pub struct RiskScoringOrchestrator {
    registry: SharedPluginRegistry,
    confidence_threshold: f64,
    scoring_deadline: Duration,
}

impl RiskScoringOrchestrator {
    pub fn new(registry: SharedPluginRegistry) -> Self {
        Self {
            registry,
            confidence_threshold: 0.5,
            scoring_deadline: Duration::from_secs(10),
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_scoring_deadline(mut self, deadline: Duration) -> Self {
        self.scoring_deadline = deadline;
        self
    }

    /// Score one listing against every enabled detection plugin.
    ///
    /// Plugins run concurrently under the scoring deadline. A plugin that
    /// errors, panics, or misses the deadline is dropped from the aggregate
    /// with a log entry; the others still contribute. The aggregation is a
    /// deterministic fold keyed by plugin id.
    pub async fn score(&self, listing: &Listing) -> FraudScore {
        let start = Instant::now();
        let entries = self.registry.enabled_detection().await;

        if entries.is_empty() {
            log::debug!("No detection plugins enabled; listing {} scores 0", listing.listing_id);
            return FraudScore::empty(
                listing.listing_id.clone(),
                start.elapsed().as_secs_f64() * 1000.0,
            );
        }

        let weights: BTreeMap<String, f64> = entries
            .iter()
            .map(|e| (e.plugin_id.clone(), e.weight))
            .collect();
        let stats: BTreeMap<String, _> = entries
            .iter()
            .map(|e| (e.plugin_id.clone(), Arc::clone(&e.stats)))
            .collect();

        let mut join_set = JoinSet::new();
        for entry in entries {
            let instance = Arc::clone(&entry.instance);
            let listing = listing.clone();
            let plugin_id = entry.plugin_id.clone();
            join_set.spawn(async move {
                let result = match instance.as_detection() {
                    Some(detector) => detector.analyze(&listing).await,
                    None => Err(crate::plugin::api::PluginError::ExecutionError {
                        plugin_id: plugin_id.clone(),
                        operation: "analyze".to_string(),
                        cause: "registry entry is not a detection plugin".to_string(),
                    }),
                };
                (plugin_id, result)
            });
        }

        // Collect until every task finishes or the deadline fires; keyed by
        // plugin id so completion order cannot affect the result.
        let mut outcomes: BTreeMap<String, crate::plugin::api::DetectionResult> = BTreeMap::new();
        let deadline = tokio::time::sleep(self.scoring_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok((plugin_id, Ok(result)))) => {
                        if let Some(plugin_stats) = stats.get(&plugin_id) {
                            plugin_stats.record_execution();
                        }
                        outcomes.insert(plugin_id, result);
                    }
                    Some(Ok((plugin_id, Err(error)))) => {
                        log::error!(
                            "Detection plugin '{}' failed on listing {}: {}",
                            plugin_id,
                            listing.listing_id,
                            error
                        );
                        if let Some(plugin_stats) = stats.get(&plugin_id) {
                            plugin_stats.record_execution();
                            plugin_stats.record_failure();
                        }
                    }
                    Some(Err(join_error)) => {
                        log::error!(
                            "Detection plugin task aborted on listing {}: {}",
                            listing.listing_id,
                            join_error
                        );
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    log::warn!(
                        "Scoring deadline {:?} hit for listing {}; {} plugin(s) dropped",
                        self.scoring_deadline,
                        listing.listing_id,
                        join_set.len()
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if outcomes.is_empty() {
            return FraudScore::empty(listing.listing_id.clone(), elapsed_ms);
        }

        self.aggregate(listing, outcomes, &weights, elapsed_ms)
    }

    fn aggregate(
        &self,
        listing: &Listing,
        outcomes: BTreeMap<String, crate::plugin::api::DetectionResult>,
        weights: &BTreeMap<String, f64>,
        elapsed_ms: f64,
    ) -> FraudScore {
        // Normalize weights over the surviving plugins; zero total weight
        // falls back to equal weighting.
        let raw_weights: Vec<f64> = outcomes
            .keys()
            .map(|id| weights.get(id).copied().unwrap_or(0.0).clamp(0.0, 1.0))
            .collect();
        let total_weight: f64 = raw_weights.iter().sum();
        let normalized: Vec<f64> = if total_weight > 0.0 {
            raw_weights.iter().map(|w| w / total_weight).collect()
        } else {
            let equal = 1.0 / outcomes.len() as f64;
            vec![equal; outcomes.len()]
        };

        let mut fraud_score = 0.0;
        let mut confidence = 0.0;
        let mut plugin_scores = Vec::with_capacity(outcomes.len());
        let mut signals: Vec<RiskSignal> = Vec::new();

        for ((plugin_id, result), weight) in outcomes.iter().zip(normalized.iter()) {
            let score = result.overall_score.clamp(0.0, 1.0);
            let plugin_confidence = result.effective_confidence().clamp(0.0, 1.0);

            fraud_score += score * weight;
            confidence += plugin_confidence * weight;

            plugin_scores.push(PluginScore {
                plugin_id: plugin_id.clone(),
                score,
                weight: *weight,
                confidence: plugin_confidence,
                signal_count: result.signals.len(),
            });

            // Low-confidence signals are excluded from the output but the
            // plugin's score already contributed above.
            for signal in &result.signals {
                if signal.confidence >= self.confidence_threshold {
                    let mut signal = signal.clone();
                    signal.plugin_id = plugin_id.clone();
                    signals.push(signal);
                }
            }
        }

        let fraud_score = (fraud_score * 100.0).clamp(0.0, 100.0);
        let risk_level = RiskLevel::from_score(fraud_score);

        log::info!(
            "Fraud analysis complete for {}: score={:.1}, risk={}, signals={}, time={:.1}ms",
            listing.listing_id,
            fraud_score,
            risk_level,
            signals.len(),
            elapsed_ms
        );

        FraudScore {
            listing_id: listing.listing_id.clone(),
            fraud_score,
            risk_level,
            confidence,
            signals,
            plugins_executed: plugin_scores.len(),
            plugin_scores,
            processing_time_ms: elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PluginManifest;
    use crate::model::listing::sample_listing;
    use crate::model::risk::RiskSignal;
    use crate::plugin::api::{
        DetectionPlugin, DetectionResult, Plugin, PluginInstance, PluginRecord, PluginResult,
        PluginState,
    };
    use std::collections::BTreeMap as Map;

    struct FixedDetector {
        score: f64,
        confidence: f64,
        signal_confidence: Option<f64>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl FixedDetector {
        fn scoring(score: f64) -> Self {
            Self {
                score,
                confidence: 0.8,
                signal_confidence: None,
                delay: None,
                fail: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Plugin for FixedDetector {}

    #[async_trait::async_trait]
    impl DetectionPlugin for FixedDetector {
        async fn analyze(&self, _listing: &Listing) -> PluginResult<DetectionResult> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(crate::plugin::api::PluginError::ExecutionError {
                    plugin_id: "fixed".to_string(),
                    operation: "analyze".to_string(),
                    cause: "synthetic failure".to_string(),
                });
            }
            let signals = match self.signal_confidence {
                Some(confidence) => vec![RiskSignal {
                    signal_type: "synthetic".to_string(),
                    score: self.score,
                    confidence,
                    plugin_id: String::new(),
                    reason: "synthetic signal".to_string(),
                    evidence: Map::new(),
                }],
                None => Vec::new(),
            };
            Ok(DetectionResult {
                overall_score: self.score,
                confidence: Some(self.confidence),
                signals,
            })
        }
    }

    fn detection_manifest(id: &str, weight: f64) -> PluginManifest {
        let text = format!(
            "id: {id}\nname: Test\nversion: 1.0.0\nkind: detection\napi_version: \"1.0\"\ndescription: Test detector\nweight: {weight}\n"
        );
        PluginManifest::parse_str(&text).unwrap()
    }

    async fn registry_with(
        detectors: Vec<(&str, f64, FixedDetector)>,
    ) -> SharedPluginRegistry {
        let shared = SharedPluginRegistry::new();
        let mut registry = shared.inner().write().await;
        for (id, weight, detector) in detectors {
            let record = PluginRecord::new(
                detection_manifest(id, weight),
                None,
                PluginInstance::Detection(Box::new(detector)),
            );
            registry.register(record).unwrap();
            registry.set_state(id, PluginState::Configured).unwrap();
            registry.set_state(id, PluginState::Enabled).unwrap();
        }
        drop(registry);
        shared
    }

    #[tokio::test]
    async fn test_empty_plugin_set_scores_safe_zero() {
        let orchestrator = RiskScoringOrchestrator::new(SharedPluginRegistry::new());
        let score = orchestrator.score(&sample_listing()).await;

        assert_eq!(score.fraud_score, 0.0);
        assert_eq!(score.risk_level, RiskLevel::Safe);
        assert!(score.signals.is_empty());
        assert_eq!(score.confidence, 0.0);
        assert_eq!(score.plugins_executed, 0);
    }

    #[tokio::test]
    async fn test_weighted_average_low_scores() {
        // Scores {0.1, 0.2} with equal weights -> 15, safe
        let registry = registry_with(vec![
            ("plugin-detection-a", 0.5, FixedDetector::scoring(0.1)),
            ("plugin-detection-b", 0.5, FixedDetector::scoring(0.2)),
        ])
        .await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        assert!((score.fraud_score - 15.0).abs() < 1e-9);
        assert_eq!(score.risk_level, RiskLevel::Safe);
    }

    #[tokio::test]
    async fn test_weighted_average_fraud_scores() {
        // Scores {0.9, 0.8} with weights {0.6, 0.4} -> 86, fraud
        let registry = registry_with(vec![
            ("plugin-detection-a", 0.6, FixedDetector::scoring(0.9)),
            ("plugin-detection-b", 0.4, FixedDetector::scoring(0.8)),
        ])
        .await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        assert!((score.fraud_score - 86.0).abs() < 1e-9);
        assert_eq!(score.risk_level, RiskLevel::Fraud);
        assert_eq!(score.detected_by().len(), 2);
    }

    #[tokio::test]
    async fn test_commutative_in_registration_order() {
        let forward = registry_with(vec![
            ("plugin-detection-a", 0.6, FixedDetector::scoring(0.9)),
            ("plugin-detection-b", 0.4, FixedDetector::scoring(0.3)),
        ])
        .await;
        let reversed = registry_with(vec![
            ("plugin-detection-b", 0.4, FixedDetector::scoring(0.3)),
            ("plugin-detection-a", 0.6, FixedDetector::scoring(0.9)),
        ])
        .await;

        let listing = sample_listing();
        let first = RiskScoringOrchestrator::new(forward).score(&listing).await;
        let second = RiskScoringOrchestrator::new(reversed).score(&listing).await;

        assert_eq!(first.fraud_score, second.fraud_score);
        assert_eq!(first.risk_level, second.risk_level);
        assert_eq!(first.confidence, second.confidence);
    }

    #[tokio::test]
    async fn test_zero_total_weight_uses_equal_weights() {
        let registry = registry_with(vec![
            ("plugin-detection-a", 0.0, FixedDetector::scoring(0.2)),
            ("plugin-detection-b", 0.0, FixedDetector::scoring(0.6)),
        ])
        .await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        // Equal weights: (0.2 + 0.6) / 2 * 100 = 40
        assert!((score.fraud_score - 40.0).abs() < 1e-9);
        assert_eq!(score.risk_level, RiskLevel::Suspicious);
    }

    #[tokio::test]
    async fn test_failing_plugin_dropped_from_aggregate() {
        let mut failing = FixedDetector::scoring(0.9);
        failing.fail = true;
        let registry = registry_with(vec![
            ("plugin-detection-bad", 0.5, failing),
            ("plugin-detection-good", 0.5, FixedDetector::scoring(0.4)),
        ])
        .await;
        let orchestrator = RiskScoringOrchestrator::new(registry.clone());
        let score = orchestrator.score(&sample_listing()).await;

        // Only the good plugin contributes, renormalized to weight 1
        assert!((score.fraud_score - 40.0).abs() < 1e-9);
        assert_eq!(score.plugins_executed, 1);

        // The failure is counted on the plugin's stats
        let descriptor = registry.descriptor("plugin-detection-bad").await.unwrap();
        assert_eq!(descriptor.failures, 1);
    }

    #[tokio::test]
    async fn test_slow_plugin_dropped_at_deadline() {
        let mut slow = FixedDetector::scoring(0.9);
        slow.delay = Some(Duration::from_secs(30));
        let registry = registry_with(vec![
            ("plugin-detection-fast", 0.5, FixedDetector::scoring(0.2)),
            ("plugin-detection-slow", 0.5, slow),
        ])
        .await;
        let orchestrator = RiskScoringOrchestrator::new(registry)
            .with_scoring_deadline(Duration::from_millis(100));
        let score = orchestrator.score(&sample_listing()).await;

        assert_eq!(score.plugins_executed, 1);
        assert!((score.fraud_score - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_confidence_signals_filtered_but_score_kept() {
        let mut detector = FixedDetector::scoring(0.8);
        detector.signal_confidence = Some(0.2); // below the 0.5 threshold
        let registry = registry_with(vec![("plugin-detection-a", 1.0, detector)]).await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        // Signal filtered from output, plugin score still aggregated
        assert!(score.signals.is_empty());
        assert!((score.fraud_score - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_confident_signals_surface_with_plugin_id() {
        let mut detector = FixedDetector::scoring(0.8);
        detector.signal_confidence = Some(0.9);
        let registry = registry_with(vec![("plugin-detection-a", 1.0, detector)]).await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        assert_eq!(score.signals.len(), 1);
        assert_eq!(score.signals[0].plugin_id, "plugin-detection-a");
    }

    #[tokio::test]
    async fn test_score_always_in_bounds() {
        // A plugin misbehaving with an out-of-range score gets clamped
        let registry =
            registry_with(vec![("plugin-detection-a", 1.0, FixedDetector::scoring(7.5))]).await;
        let orchestrator = RiskScoringOrchestrator::new(registry);
        let score = orchestrator.score(&sample_listing()).await;

        assert!(score.fraud_score <= 100.0);
        assert_eq!(score.risk_level, RiskLevel::Fraud);
    }

    #[tokio::test]
    async fn test_classification_bands() {
        for (raw, expected) in [
            (0.0, RiskLevel::Safe),
            (0.29, RiskLevel::Safe),
            (0.3, RiskLevel::Suspicious),
            (0.69, RiskLevel::Suspicious),
            (0.7, RiskLevel::Fraud),
            (1.0, RiskLevel::Fraud),
        ] {
            let registry =
                registry_with(vec![("plugin-detection-a", 1.0, FixedDetector::scoring(raw))])
                    .await;
            let orchestrator = RiskScoringOrchestrator::new(registry);
            let score = orchestrator.score(&sample_listing()).await;
            assert_eq!(score.risk_level, expected, "raw score {}", raw);
        }
    }
}
