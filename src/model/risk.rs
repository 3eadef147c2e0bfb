//! Risk classification types shared by scoring and events

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk band derived from the 0-100 fraud score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Suspicious,
    Fraud,
}

impl RiskLevel {
    /// Band edges: [0,30) safe, [30,70) suspicious, [70,100] fraud.
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            RiskLevel::Safe
        } else if score < 70.0 {
            RiskLevel::Suspicious
        } else {
            RiskLevel::Fraud
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Suspicious => "suspicious",
            RiskLevel::Fraud => "fraud",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fraud indicator emitted by a detection plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub signal_type: String,
    /// Severity in [0,1]
    pub score: f64,
    /// Plugin's confidence in this signal, [0,1]
    pub confidence: f64,
    pub plugin_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub evidence: BTreeMap<String, serde_json::Value>,
}
