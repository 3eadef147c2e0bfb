//! Event Models for the Processing Pipeline
//!
//! Every queued event wraps a typed body in the standard envelope. Child
//! events copy the parent's trace and request ids; the envelope is the unit
//! of idempotence (`event_id`) and retry accounting.

use crate::core::trace::TraceContext;
use crate::model::listing::Listing;
use crate::model::risk::{RiskLevel, RiskSignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed topic names, flat namespace.
pub mod topics {
    pub const RAW_LISTINGS: &str = "listings.raw";
    pub const NORMALIZED_LISTINGS: &str = "listings.normalized";
    pub const PROCESSED_LISTINGS: &str = "listings.processed";
    pub const FRAUD_DETECTED: &str = "fraud.detected";
    pub const PROCESSING_FAILED: &str = "processing.failed";
    pub const DEAD_LETTER: &str = "dead_letter";

    pub fn all() -> [&'static str; 6] {
        [
            RAW_LISTINGS,
            NORMALIZED_LISTINGS,
            PROCESSED_LISTINGS,
            FRAUD_DETECTED,
            PROCESSING_FAILED,
            DEAD_LETTER,
        ]
    }
}

/// Envelope schema version on the wire.
pub const ENVELOPE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RawListing,
    ListingNormalized,
    ListingProcessed,
    FraudDetected,
    ProcessingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
}

/// Metadata wrapper carried by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source_plugin_id: String,
    pub source_platform: String,
    pub trace_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub version: String,
}

fn default_max_retries() -> u32 {
    3
}

impl EventEnvelope {
    /// A fresh root envelope with a new event id, carrying the ids from the
    /// given trace context.
    pub fn new(
        event_type: EventType,
        source_plugin_id: impl Into<String>,
        source_platform: impl Into<String>,
        ctx: &TraceContext,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source_plugin_id: source_plugin_id.into(),
            source_platform: source_platform.into(),
            trace_id: ctx.trace_id.clone(),
            request_id: ctx.request_id.clone(),
            parent_event_id: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            status: EventStatus::Pending,
            tags: BTreeMap::new(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }

    /// A child envelope: new event id, parent's trace/request ids copied,
    /// `parent_event_id` pointing back at the parent.
    pub fn child_of(parent: &EventEnvelope, event_type: EventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source_plugin_id: parent.source_plugin_id.clone(),
            source_platform: parent.source_platform.clone(),
            trace_id: parent.trace_id.clone(),
            request_id: parent.request_id.clone(),
            parent_event_id: Some(parent.event_id.clone()),
            retry_count: 0,
            max_retries: parent.max_retries,
            status: EventStatus::Pending,
            tags: parent.tags.clone(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }

    /// Trace context carried by this envelope.
    pub fn trace_context(&self) -> TraceContext {
        TraceContext::inherited(self.trace_id.clone(), self.request_id.clone())
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Raw listing event from a source plugin, payload untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListingEvent {
    pub envelope: EventEnvelope,
    pub raw_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Fully processed listing: pipeline applied, fraud detection completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedListingEvent {
    pub envelope: EventEnvelope,
    pub listing: Listing,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub signals: Vec<RiskSignal>,
    pub processing_stages: Vec<String>,
    pub processing_duration_ms: f64,
    #[serde(default)]
    pub plugins_applied: Vec<String>,
}

/// Emitted alongside the processed event when the risk level is `fraud`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudDetectedEvent {
    pub envelope: EventEnvelope,
    pub listing_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_url: Option<String>,
    pub fraud_score: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub signals: Vec<RiskSignal>,
    /// Plugins whose signals flagged the listing
    #[serde(default)]
    pub detected_by: Vec<String>,
    pub confidence: f64,
}

/// Terminal failure record; carries enough to reprocess manually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingFailedEvent {
    pub envelope: EventEnvelope,
    pub error_kind: String,
    pub error_message: String,
    pub failed_stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_plugin: Option<String>,
    pub original_event: serde_json::Value,
    pub is_recoverable: bool,
}
