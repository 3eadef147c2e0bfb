//! Built-in Price Anomaly Detector
//!
//! Flags listings whose asking price is implausible for their size. The
//! classic rental scam is a price far below market; far above usually means
//! a data error rather than fraud, so it scores lower.

use crate::model::listing::Listing;
use crate::model::risk::RiskSignal;
use crate::plugin::error::PluginResult;
use crate::plugin::settings::PluginSettings;
use crate::plugin::traits::{DetectionPlugin, Plugin};
use crate::plugin::types::DetectionResult;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct Thresholds {
    /// Below this €/m² the listing is suspiciously cheap
    min_price_per_sqm: f64,
    /// Above this €/m² the price looks like a data error
    max_price_per_sqm: f64,
    /// Absolute floor; anything below is suspicious regardless of size
    min_total_price: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_price_per_sqm: 500.0,
            max_price_per_sqm: 20000.0,
            min_total_price: 5000.0,
        }
    }
}

pub struct PriceAnomalyPlugin {
    thresholds: RwLock<Thresholds>,
}

impl PriceAnomalyPlugin {
    pub fn new() -> Self {
        Self {
            thresholds: RwLock::new(Thresholds::default()),
        }
    }

    fn signal(&self, listing: &Listing, signal_type: &str, score: f64, confidence: f64, reason: String) -> RiskSignal {
        let mut evidence = BTreeMap::new();
        evidence.insert(
            "price_amount".to_string(),
            serde_json::json!(listing.price.amount),
        );
        if let Some(area) = listing.details.area_sqm {
            evidence.insert("area_sqm".to_string(), serde_json::json!(area));
        }
        RiskSignal {
            signal_type: signal_type.to_string(),
            score,
            confidence,
            plugin_id: "plugin-detection-price-anomaly".to_string(),
            reason,
            evidence,
        }
    }
}

impl Default for PriceAnomalyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Plugin for PriceAnomalyPlugin {
    async fn configure(&self, settings: &PluginSettings) -> PluginResult<()> {
        let mut thresholds = self.thresholds.write().unwrap();
        if let Some(value) = settings.get_f64("min_price_per_sqm") {
            thresholds.min_price_per_sqm = value;
        }
        if let Some(value) = settings.get_f64("max_price_per_sqm") {
            thresholds.max_price_per_sqm = value;
        }
        if let Some(value) = settings.get_f64("min_total_price") {
            thresholds.min_total_price = value;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DetectionPlugin for PriceAnomalyPlugin {
    fn weight(&self) -> f64 {
        0.6
    }

    async fn analyze(&self, listing: &Listing) -> PluginResult<DetectionResult> {
        let thresholds = self.thresholds.read().unwrap().clone();
        let mut signals = Vec::new();

        if listing.price.amount < thresholds.min_total_price {
            signals.push(self.signal(
                listing,
                "price_below_floor",
                0.9,
                0.9,
                format!(
                    "asking price {} {} is below the plausibility floor",
                    listing.price.amount, listing.price.currency
                ),
            ));
        }

        if let Some(area) = listing.details.area_sqm {
            if area > 0.0 {
                let per_sqm = listing.price.amount / area;
                if per_sqm < thresholds.min_price_per_sqm {
                    signals.push(self.signal(
                        listing,
                        "price_per_sqm_too_low",
                        0.8,
                        0.8,
                        format!(
                            "{:.0} per square metre is far below market",
                            per_sqm
                        ),
                    ));
                } else if per_sqm > thresholds.max_price_per_sqm {
                    signals.push(self.signal(
                        listing,
                        "price_per_sqm_too_high",
                        0.4,
                        0.6,
                        format!("{:.0} per square metre looks like a data error", per_sqm),
                    ));
                }
            }
        }

        let overall_score = signals
            .iter()
            .map(|s| s.score)
            .fold(0.0f64, f64::max);

        Ok(DetectionResult {
            overall_score,
            confidence: None,
            signals,
        })
    }
}
