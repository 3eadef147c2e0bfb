//! Orchestrator statistics
//!
//! Lock-free counters updated by the event handler, snapshotted for the
//! health view.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct OrchestratorStats {
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    events_retried: AtomicU64,
    plugins_executed: AtomicU64,
    /// Accumulated handler time in microseconds
    total_processing_us: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_retried: u64,
    pub plugins_executed: u64,
    pub total_processing_time_ms: f64,
    pub avg_processing_time_ms: f64,
}

impl OrchestratorStats {
    pub fn record_processed(&self, duration_us: u64) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.events_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_plugin_execution(&self) {
        self.plugins_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.events_processed.load(Ordering::Relaxed);
        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        let total_ms = total_us as f64 / 1000.0;
        StatsSnapshot {
            events_processed: processed,
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_retried: self.events_retried.load(Ordering::Relaxed),
            plugins_executed: self.plugins_executed.load(Ordering::Relaxed),
            total_processing_time_ms: total_ms,
            avg_processing_time_ms: if processed > 0 {
                total_ms / processed as f64
            } else {
                0.0
            },
        }
    }
}
