//! Risk-Scoring Orchestrator
//!
//! Fans a listing out to every enabled detection plugin, aggregates the
//! surviving results into a 0-100 fraud score by weighted average, and
//! classifies the risk band. Pure apart from logging: same enabled set and
//! listing in, same score out, whatever order plugins complete in.

pub(crate) mod orchestrator;

pub use orchestrator::{FraudScore, PluginScore, RiskScoringOrchestrator};
