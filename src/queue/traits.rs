//! Queue Contract
//!
//! One interface, two implementations: the in-memory queue for development
//! and tests, the Redis-stream queue for production. Delivery is
//! at-least-once on both; consumers must be idempotent keyed by the event id
//! inside the payload.

use crate::queue::error::QueueResult;
use crate::queue::message::QueueMessage;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Handler failure: the queue decides requeue vs dead-letter from the flag.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub requeue: bool,
}

impl HandlerError {
    pub fn requeue(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requeue: true,
        }
    }

    pub fn discard(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requeue: false,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Subscription callback. Invoked once per delivery; success auto-acks.
pub type MessageHandler = Arc<dyn Fn(QueueMessage) -> HandlerFuture + Send + Sync>;

/// Health snapshot returned by `health_check`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    pub latency_ms: f64,
    pub backend: &'static str,
}

/// Counter snapshot for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatistics {
    pub messages_published: u64,
    pub messages_consumed: u64,
    pub messages_acked: u64,
    pub messages_rejected: u64,
    pub dead_lettered: u64,
    pub handler_errors: u64,
    pub active_subscriptions: u64,
}

/// The queue abstraction both backends implement.
///
/// At-least-once semantics: a message stays pending between delivery and
/// ack; a consumer crash redelivers it. `reject` with `requeue=true` makes
/// the message available again; with `requeue=false` it moves to the dead
/// letter sink.
#[async_trait::async_trait]
pub trait EventQueue: Send + Sync {
    async fn connect(&self) -> QueueResult<()>;

    /// Stop subscriptions, drain in-flight handlers, close the backend.
    async fn disconnect(&self) -> QueueResult<()>;

    async fn publish(&self, topic: &str, message: QueueMessage) -> QueueResult<String>;

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> QueueResult<String>;

    async fn unsubscribe(&self, subscription_id: &str) -> QueueResult<()>;

    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    async fn reject(&self, message_id: &str, requeue: bool) -> QueueResult<()>;

    async fn queue_size(&self, topic: &str) -> QueueResult<usize>;

    async fn purge(&self, topic: &str) -> QueueResult<usize>;

    /// Dead-letter entries, most recent last, for manual replay.
    async fn dead_letter_messages(&self, limit: usize) -> QueueResult<Vec<QueueMessage>>;

    fn statistics(&self) -> QueueStatistics;

    async fn health_check(&self) -> QueueHealth;
}

/// Shared atomic counters used by both backends.
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub published: std::sync::atomic::AtomicU64,
    pub consumed: std::sync::atomic::AtomicU64,
    pub acked: std::sync::atomic::AtomicU64,
    pub rejected: std::sync::atomic::AtomicU64,
    pub dead_lettered: std::sync::atomic::AtomicU64,
    pub handler_errors: std::sync::atomic::AtomicU64,
    pub subscriptions: std::sync::atomic::AtomicU64,
}

impl QueueCounters {
    pub fn snapshot(&self) -> QueueStatistics {
        use std::sync::atomic::Ordering;
        QueueStatistics {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_consumed: self.consumed.load(Ordering::Relaxed),
            messages_acked: self.acked.load(Ordering::Relaxed),
            messages_rejected: self.rejected.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            active_subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}
