//! Unified Data Model
//!
//! The canonical listing shape every source plugin maps into. Normalized
//! listings are value types: processing plugins take one in and return a new
//! one, nothing mutates a listing after emission.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub plugin_id: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_sqm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Media {
    pub images: Vec<MediaImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Details {
    pub rooms: Option<u32>,
    pub area_sqm: Option<f64>,
    pub floor: Option<i32>,
    pub floors_total: Option<i32>,
    pub year_built: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seller {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub seller_type: Option<String>,
    pub verified: bool,
}

/// Sale or rental offer classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Sale,
    Rent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Apartment,
    House,
    Commercial,
    Land,
}

/// A normalized real-estate listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: String,
    pub source: SourceInfo,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub property_type: PropertyType,
    pub location: Location,
    pub price: Price,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Details,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    #[serde(default)]
    pub seller: Seller,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Listing {
    /// Check the UDM invariants. Returns every violated invariant, not just
    /// the first, so normalizer failures are actionable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.listing_id.trim().is_empty() {
            problems.push("listing_id must not be empty".to_string());
        }
        if self.source.platform.trim().is_empty() {
            problems.push("source.platform must not be empty".to_string());
        }
        if self.price.amount < 0.0 {
            problems.push(format!("price.amount {} is negative", self.price.amount));
        }
        if let Some(coords) = &self.location.coordinates {
            if !coords.is_valid() {
                problems.push(format!(
                    "coordinates ({}, {}) are out of bounds",
                    coords.lat, coords.lng
                ));
            }
        }

        problems
    }
}

/// Fixture used across the crate's unit tests.
#[cfg(test)]
pub(crate) fn sample_listing() -> Listing {
    Listing {
        listing_id: "7f9c2f6a-18aa-4b8e-9a7e-6e2d3c5b1a09".to_string(),
        source: SourceInfo {
            plugin_id: "plugin-source-idealista".to_string(),
            platform: "idealista".to_string(),
            original_id: Some("12345".to_string()),
            url: Some("https://example.test/listing/12345".to_string()),
        },
        listing_type: ListingType::Sale,
        property_type: PropertyType::Apartment,
        location: Location {
            country: Some("PT".to_string()),
            city: Some("Lisboa".to_string()),
            address: None,
            coordinates: Some(Coordinates {
                lat: 38.7223,
                lng: -9.1393,
            }),
        },
        price: Price {
            amount: 500_000.0,
            currency: "EUR".to_string(),
            price_per_sqm: None,
        },
        description: Some("Bright T3 near the river".to_string()),
        details: Details {
            rooms: Some(3),
            area_sqm: Some(96.0),
            ..Details::default()
        },
        media: None,
        seller: Seller::default(),
        metadata: BTreeMap::new(),
    }
}
