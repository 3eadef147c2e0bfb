//! Processing Pipeline
//!
//! The orchestrator that moves listings from the raw topic through the
//! priority-ordered processing chain and the scoring fan-out, emitting
//! processed, fraud-detected, and failure events.

pub(crate) mod orchestrator;
pub(crate) mod sources;
pub(crate) mod stats;

pub use orchestrator::{OrchestratorConfig, OrchestratorHealth, ProcessingOrchestrator};
pub use sources::SourcePump;
pub use stats::{OrchestratorStats, StatsSnapshot};
