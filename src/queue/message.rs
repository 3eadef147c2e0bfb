//! Queue Message Types
//!
//! A queue message is one serialized event (envelope + typed body) addressed
//! to a topic. The payload stays opaque to the queue; typed encode/decode
//! lives here so both backends share it.

use crate::queue::error::{QueueError, QueueResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::SystemTime;

/// One message between publish and ack/reject.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Backend-assigned delivery id (uuid for memory, stream id for streams)
    pub message_id: String,
    pub topic: String,
    /// Serialized event: envelope and body as one JSON document
    pub payload: String,
    /// How many times this message has been handed to a consumer
    pub delivery_count: u32,
    pub enqueued_at: SystemTime,
}

impl QueueMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload: payload.into(),
            delivery_count: 0,
            enqueued_at: SystemTime::now(),
        }
    }

    /// Serialize a typed event into a message for `topic`.
    pub fn encode<T: Serialize>(topic: impl Into<String>, event: &T) -> QueueResult<Self> {
        let payload = serde_json::to_string(event).map_err(|e| QueueError::Serialization {
            cause: e.to_string(),
        })?;
        Ok(Self::new(topic, payload))
    }

    /// Deserialize the payload into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> QueueResult<T> {
        serde_json::from_str(&self.payload).map_err(|e| QueueError::Serialization {
            cause: e.to_string(),
        })
    }
}
