//! Type definitions for the plugin system
//!
//! Core data structures for plugin lifecycle state, runtime failure
//! classification, detection output, and per-plugin statistics.

use crate::model::risk::RiskSignal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a loaded plugin.
///
/// ```text
///          load                 configure               enable
/// Unknown ------> Registered -------------> Configured --------> Enabled
///                     |                          |                  |
///                     |     configure-fail       |      disable     |
///                     +--------> Failed <--------+   <--------------+
/// ```
///
/// Only `Enabled` plugins participate in processing and scoring. A reload
/// failure leaves the previous state untouched; a hook failure drives the
/// plugin to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginState {
    Registered,
    Configured,
    Enabled,
    Disabled,
    Failed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Registered => "Registered",
            PluginState::Configured => "Configured",
            PluginState::Enabled => "Enabled",
            PluginState::Disabled => "Disabled",
            PluginState::Failed => "Failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (Registered, Configured)
                | (Registered, Failed)
                | (Configured, Enabled)
                | (Configured, Failed)
                | (Enabled, Disabled)
                | (Enabled, Failed)
                | (Disabled, Enabled)
                | (Disabled, Failed)
                // reload re-registers a fresh instance
                | (Enabled, Registered)
                | (Disabled, Registered)
                | (Failed, Registered)
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime failure from a processing plugin, tagged for retry policy.
///
/// Transient failures (timeouts, broker hiccups, rate limits) are retried by
/// the orchestrator; permanent failures (schema violations, unparseable
/// payloads) skip retry and go straight to the dead letter queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingError {
    Transient { message: String },
    Permanent { message: String },
}

impl ProcessingError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProcessingError::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProcessingError::Permanent {
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessingError::Permanent { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessingError::Transient { message } | ProcessingError::Permanent { message } => {
                message
            }
        }
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingError::Transient { message } => write!(f, "transient: {}", message),
            ProcessingError::Permanent { message } => write!(f, "permanent: {}", message),
        }
    }
}

impl std::error::Error for ProcessingError {}

/// Output of one detection plugin's `analyze` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Plugin-level fraud estimate in [0,1]
    pub overall_score: f64,
    /// Plugin's own confidence; when absent the mean signal confidence is used
    pub confidence: Option<f64>,
    pub signals: Vec<RiskSignal>,
}

impl DetectionResult {
    pub fn clean() -> Self {
        Self {
            overall_score: 0.0,
            confidence: Some(1.0),
            signals: Vec::new(),
        }
    }

    /// Confidence used in aggregation: reported value, else mean of signal
    /// confidences, else zero.
    pub fn effective_confidence(&self) -> f64 {
        if let Some(confidence) = self.confidence {
            return confidence;
        }
        if self.signals.is_empty() {
            return 0.0;
        }
        self.signals.iter().map(|s| s.confidence).sum::<f64>() / self.signals.len() as f64
    }
}

/// Per-plugin execution counters, updated lock-free.
#[derive(Debug, Default)]
pub struct PluginStats {
    executions: AtomicU64,
    failures: AtomicU64,
}

impl PluginStats {
    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(PluginState::Registered.can_transition_to(PluginState::Configured));
        assert!(PluginState::Configured.can_transition_to(PluginState::Enabled));
        assert!(PluginState::Enabled.can_transition_to(PluginState::Disabled));
        assert!(PluginState::Disabled.can_transition_to(PluginState::Enabled));
    }

    #[test]
    fn test_failure_transitions() {
        assert!(PluginState::Registered.can_transition_to(PluginState::Failed));
        assert!(PluginState::Configured.can_transition_to(PluginState::Failed));
        assert!(PluginState::Enabled.can_transition_to(PluginState::Failed));
    }

    #[test]
    fn test_reload_returns_to_registered() {
        assert!(PluginState::Enabled.can_transition_to(PluginState::Registered));
        assert!(PluginState::Failed.can_transition_to(PluginState::Registered));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(!PluginState::Registered.can_transition_to(PluginState::Enabled));
        assert!(!PluginState::Failed.can_transition_to(PluginState::Enabled));
        assert!(!PluginState::Disabled.can_transition_to(PluginState::Configured));
    }

    #[test]
    fn test_processing_error_classification() {
        assert!(!ProcessingError::transient("broker timeout").is_permanent());
        assert!(ProcessingError::permanent("payload is not JSON").is_permanent());
        assert_eq!(
            ProcessingError::transient("broker timeout").message(),
            "broker timeout"
        );
    }

    #[test]
    fn test_effective_confidence_prefers_reported_value() {
        let result = DetectionResult {
            overall_score: 0.5,
            confidence: Some(0.9),
            signals: vec![],
        };
        assert_eq!(result.effective_confidence(), 0.9);
    }

    #[test]
    fn test_effective_confidence_falls_back_to_signal_mean() {
        let signal = |confidence: f64| RiskSignal {
            signal_type: "test".to_string(),
            score: 0.5,
            confidence,
            plugin_id: "plugin-detection-test".to_string(),
            reason: "test".to_string(),
            evidence: Default::default(),
        };
        let result = DetectionResult {
            overall_score: 0.5,
            confidence: None,
            signals: vec![signal(0.4), signal(0.8)],
        };
        assert!((result.effective_confidence() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_effective_confidence_zero_without_signals() {
        let result = DetectionResult {
            overall_score: 0.5,
            confidence: None,
            signals: vec![],
        };
        assert_eq!(result.effective_confidence(), 0.0);
    }

    #[test]
    fn test_stats_counters() {
        let stats = PluginStats::default();
        stats.record_execution();
        stats.record_execution();
        stats.record_failure();
        assert_eq!(stats.executions(), 2);
        assert_eq!(stats.failures(), 1);
    }
}
