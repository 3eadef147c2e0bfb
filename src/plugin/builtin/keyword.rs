//! Built-in Keyword Detector
//!
//! Scans the listing description and seller fields for phrases that recur in
//! rental and deposit scams. Cheap, language-dependent, and deliberately
//! conservative: a single phrase is a weak signal, several together are not.

use crate::model::listing::Listing;
use crate::model::risk::RiskSignal;
use crate::plugin::error::PluginResult;
use crate::plugin::settings::PluginSettings;
use crate::plugin::traits::{DetectionPlugin, Plugin};
use crate::plugin::types::DetectionResult;
use std::collections::BTreeMap;
use std::sync::RwLock;

const DEFAULT_PHRASES: &[&str] = &[
    "western union",
    "moneygram",
    "wire transfer",
    "pay before viewing",
    "deposit up front",
    "currently abroad",
    "cannot show the apartment",
    "god bless",
    "urgent sale",
];

pub struct KeywordDetectorPlugin {
    phrases: RwLock<Vec<String>>,
}

impl KeywordDetectorPlugin {
    pub fn new() -> Self {
        Self {
            phrases: RwLock::new(
                DEFAULT_PHRASES.iter().map(|s| s.to_string()).collect(),
            ),
        }
    }
}

impl Default for KeywordDetectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Plugin for KeywordDetectorPlugin {
    async fn configure(&self, settings: &PluginSettings) -> PluginResult<()> {
        if let Some(value) = settings.get("phrases") {
            if let Some(list) = value.as_array() {
                let parsed: Vec<String> = list
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .collect();
                if !parsed.is_empty() {
                    *self.phrases.write().unwrap() = parsed;
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DetectionPlugin for KeywordDetectorPlugin {
    fn weight(&self) -> f64 {
        0.4
    }

    async fn analyze(&self, listing: &Listing) -> PluginResult<DetectionResult> {
        let mut haystack = String::new();
        if let Some(description) = &listing.description {
            haystack.push_str(&description.to_lowercase());
        }
        if let Some(name) = &listing.seller.name {
            haystack.push(' ');
            haystack.push_str(&name.to_lowercase());
        }

        let phrases = self.phrases.read().unwrap().clone();
        let matched: Vec<String> = phrases
            .iter()
            .filter(|phrase| haystack.contains(phrase.as_str()))
            .cloned()
            .collect();

        if matched.is_empty() {
            return Ok(DetectionResult {
                overall_score: 0.0,
                confidence: Some(0.7),
                signals: Vec::new(),
            });
        }

        // One phrase: 0.4; each further phrase adds 0.2 up to 1.0
        let score = (0.4 + 0.2 * (matched.len() as f64 - 1.0)).min(1.0);
        let confidence = (0.5 + 0.15 * matched.len() as f64).min(0.95);

        let mut evidence = BTreeMap::new();
        evidence.insert("matched_phrases".to_string(), serde_json::json!(matched));

        let signals = vec![RiskSignal {
            signal_type: "scam_keywords".to_string(),
            score,
            confidence,
            plugin_id: "plugin-detection-keywords".to_string(),
            reason: format!("description contains {} known scam phrase(s)", matched.len()),
            evidence,
        }];

        Ok(DetectionResult {
            overall_score: score,
            confidence: Some(confidence),
            signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::listing::sample_listing;

    #[tokio::test]
    async fn test_clean_description_scores_zero() {
        let plugin = KeywordDetectorPlugin::new();
        let result = plugin.analyze(&sample_listing()).await.unwrap();
        assert_eq!(result.overall_score, 0.0);
        assert!(result.signals.is_empty());
    }

    #[tokio::test]
    async fn test_single_phrase_is_weak_signal() {
        let plugin = KeywordDetectorPlugin::new();
        let mut listing = sample_listing();
        listing.description = Some("I am currently abroad, contact by email only".to_string());

        let result = plugin.analyze(&listing).await.unwrap();
        assert!((result.overall_score - 0.4).abs() < 1e-9);
        assert_eq!(result.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_phrases_escalate() {
        let plugin = KeywordDetectorPlugin::new();
        let mut listing = sample_listing();
        listing.description = Some(
            "I am currently abroad. Please send deposit up front via western union."
                .to_string(),
        );

        let result = plugin.analyze(&listing).await.unwrap();
        assert!(result.overall_score >= 0.8);
        let evidence = &result.signals[0].evidence["matched_phrases"];
        assert_eq!(evidence.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_matching_is_case_insensitive() {
        let plugin = KeywordDetectorPlugin::new();
        let mut listing = sample_listing();
        listing.description = Some("Payment by WIRE TRANSFER only".to_string());

        let result = plugin.analyze(&listing).await.unwrap();
        assert!(result.overall_score > 0.0);
    }

    #[tokio::test]
    async fn test_phrases_configurable() {
        let plugin = KeywordDetectorPlugin::new();
        let mut values = std::collections::BTreeMap::new();
        values.insert(
            "phrases".to_string(),
            serde_json::json!(["pague adiantado"]),
        );
        plugin
            .configure(&PluginSettings::from_values(values))
            .await
            .unwrap();

        let mut listing = sample_listing();
        listing.description = Some("Pague adiantado por favor".to_string());
        let result = plugin.analyze(&listing).await.unwrap();
        assert!(result.overall_score > 0.0);

        // Default phrases were replaced
        listing.description = Some("western union".to_string());
        let result = plugin.analyze(&listing).await.unwrap();
        assert_eq!(result.overall_score, 0.0);
    }
}
