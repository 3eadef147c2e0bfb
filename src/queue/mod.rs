//! Queue Abstraction
//!
//! Durable event transport between pipeline stages: one contract, an
//! in-memory backend for development and tests, and a Redis-stream backend
//! with consumer groups for production. Delivery is at-least-once on both;
//! consumers are idempotent keyed by the envelope's event id.

// Internal modules - all access should go through api module
pub(crate) mod error;
pub(crate) mod memory;
pub(crate) mod message;
pub(crate) mod stream;
pub(crate) mod traits;

// Public API module - the only public interface for the queue system
pub mod api;
