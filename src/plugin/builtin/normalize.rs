//! Built-in Normalizer
//!
//! First pipeline stage: maps a raw portal payload into the unified listing
//! shape. Raw payloads differ per portal, so the mapping is defensive about
//! field names and types; a payload that cannot yield the mandatory fields is
//! a permanent failure (no retry will fix it).

use crate::plugin::error::PluginResult;
use crate::plugin::settings::PluginSettings;
use crate::plugin::traits::{Plugin, ProcessingPlugin};
use crate::plugin::types::ProcessingError;
use serde_json::{json, Value};
use std::sync::RwLock;

pub struct NormalizerPlugin {
    default_currency: RwLock<String>,
}

impl NormalizerPlugin {
    pub fn new() -> Self {
        Self {
            default_currency: RwLock::new("EUR".to_string()),
        }
    }
}

impl Default for NormalizerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Plugin for NormalizerPlugin {
    async fn configure(&self, settings: &PluginSettings) -> PluginResult<()> {
        if let Some(currency) = settings.get_str("default_currency") {
            *self.default_currency.write().unwrap() = currency.to_string();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProcessingPlugin for NormalizerPlugin {
    fn stage_name(&self) -> &str {
        "normalize"
    }

    fn priority(&self) -> i32 {
        1
    }

    async fn process(&self, document: Value) -> Result<Value, ProcessingError> {
        // Already normalized documents pass through untouched; later stages
        // may re-run the pipeline on reprocessing.
        if document.get("listing_id").is_some() && document.get("source").is_some() {
            return Ok(document);
        }

        let obj = document.as_object().ok_or_else(|| {
            ProcessingError::permanent("raw payload is not a JSON object")
        })?;

        let listing_id = string_field(obj, &["listing_id", "id", "reference"])
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let platform = string_field(obj, &["platform", "portal", "site"])
            .ok_or_else(|| ProcessingError::permanent("payload carries no source platform"))?;

        let amount = number_field(obj, &["price", "amount", "price_eur"])
            .ok_or_else(|| ProcessingError::permanent("payload carries no usable price"))?;
        if amount < 0.0 {
            return Err(ProcessingError::permanent(format!(
                "price {} is negative",
                amount
            )));
        }

        let currency = string_field(obj, &["currency"])
            .unwrap_or_else(|| self.default_currency.read().unwrap().clone());

        let mut listing = json!({
            "listing_id": listing_id,
            "source": {
                "plugin_id": string_field(obj, &["plugin_id", "source_plugin_id"])
                    .unwrap_or_else(|| "plugin-source-unknown".to_string()),
                "platform": platform,
                "original_id": string_field(obj, &["original_id", "external_id"]),
                "url": string_field(obj, &["url", "link"]),
            },
            "type": string_field(obj, &["type", "offer_type"])
                .unwrap_or_else(|| "sale".to_string()),
            "property_type": string_field(obj, &["property_type", "category"])
                .unwrap_or_else(|| "apartment".to_string()),
            "location": {
                "country": string_field(obj, &["country"]),
                "city": string_field(obj, &["city", "town", "municipality"]),
                "address": string_field(obj, &["address", "street"]),
            },
            "price": {
                "amount": amount,
                "currency": currency,
            },
            "description": string_field(obj, &["description", "text", "body"]),
            "details": {
                "rooms": number_field(obj, &["rooms", "bedrooms"]).map(|n| n as u32),
                "area_sqm": number_field(obj, &["area_sqm", "area", "size_m2"]),
            },
        });

        // Coordinates only when both halves are present and in bounds
        if let (Some(lat), Some(lng)) = (
            number_field(obj, &["lat", "latitude"]),
            number_field(obj, &["lng", "lon", "longitude"]),
        ) {
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
                listing["location"]["coordinates"] = json!({ "lat": lat, "lng": lng });
            } else {
                return Err(ProcessingError::permanent(format!(
                    "coordinates ({}, {}) are out of bounds",
                    lat, lng
                )));
            }
        }

        Ok(listing)
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    for name in names {
        match obj.get(*name) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn number_field(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<f64> {
    for name in names {
        match obj.get(*name) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                // Portals love "500 000" and "500.000,50"; strip spaces first
                let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
                if let Ok(parsed) = cleaned.parse::<f64>() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}
