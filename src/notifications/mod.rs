//! Lifecycle notification bus
//!
//! Internal pub/sub for system, plugin, and queue lifecycle events. Distinct
//! from the data-plane queue: this bus carries operational signals inside the
//! process, nothing here is durable.

// Internal modules - all access should go through api module
pub(crate) mod error;
pub(crate) mod event;
pub(crate) mod manager;

// Public API module - the only public interface for the notification system
pub mod api;
