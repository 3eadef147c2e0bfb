//! Processing Orchestrator
//!
//! Consumes raw listing events, runs the priority-ordered processing
//! pipeline, invokes the risk-scoring orchestrator, and emits processed and
//! fraud-detected events. Failures flow through the retry policy: transient
//! errors re-publish to the raw topic with an incremented retry count,
//! permanent errors and exhausted retries produce a processing-failed event
//! and a dead-letter entry.
//!
//! A plugin error never crashes a worker; it is logged, counted, and routed
//! per policy. Handling is deterministic per event id, which is what makes
//! at-least-once delivery safe.

use crate::core::trace;
use crate::model::event::{
    topics, EventEnvelope, EventStatus, EventType, FraudDetectedEvent, ProcessedListingEvent,
    ProcessingFailedEvent, RawListingEvent,
};
use crate::model::listing::Listing;
use crate::model::risk::RiskLevel;
use crate::pipeline::stats::{OrchestratorStats, StatsSnapshot};
use crate::plugin::api::SharedPluginRegistry;
use crate::queue::api::{EventQueue, HandlerError, MessageHandler, QueueHealth, QueueMessage};
use crate::scoring::RiskScoringOrchestrator;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Per-listing wall-clock budget for pipeline + scoring
    pub listing_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            listing_deadline: Duration::from_secs(60),
        }
    }
}

/// Health view combining orchestrator and queue state.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorHealth {
    pub running: bool,
    pub queue: QueueHealth,
    pub statistics: StatsSnapshot,
}

/// Why a pipeline run failed, for routing and the failure event.
#[derive(Debug)]
struct PipelineFailure {
    error_kind: &'static str,
    message: String,
    failed_stage: String,
    failed_plugin: Option<String>,
    permanent: bool,
}

impl PipelineFailure {
    fn transient(stage: &str, plugin: Option<String>, message: String) -> Self {
        Self {
            error_kind: "transient_error",
            message,
            failed_stage: stage.to_string(),
            failed_plugin: plugin,
            permanent: false,
        }
    }

    fn permanent(stage: &str, plugin: Option<String>, message: String) -> Self {
        Self {
            error_kind: "permanent_error",
            message,
            failed_stage: stage.to_string(),
            failed_plugin: plugin,
            permanent: true,
        }
    }

    fn deadline(deadline: Duration) -> Self {
        Self {
            error_kind: "deadline_exceeded",
            message: format!("listing processing exceeded {:?}", deadline),
            failed_stage: "pipeline".to_string(),
            failed_plugin: None,
            permanent: false,
        }
    }
}

/// Subscribes to the raw topic and drives listings through the pipeline.
pub struct ProcessingOrchestrator {
    registry: SharedPluginRegistry,
    queue: Arc<dyn EventQueue>,
    scoring: RiskScoringOrchestrator,
    config: OrchestratorConfig,
    stats: Arc<OrchestratorStats>,
    running: AtomicBool,
    subscription_id: Mutex<Option<String>>,
}

impl ProcessingOrchestrator {
    pub fn new(
        registry: SharedPluginRegistry,
        queue: Arc<dyn EventQueue>,
        scoring: RiskScoringOrchestrator,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            queue,
            scoring,
            config,
            stats: Arc::new(OrchestratorStats::default()),
            running: AtomicBool::new(false),
            subscription_id: Mutex::new(None),
        })
    }

    /// Subscribe to the raw-listing topic and start handling events.
    pub async fn start(self: &Arc<Self>) -> crate::queue::api::QueueResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            log::warn!("Orchestrator already running");
            return Ok(());
        }

        let orchestrator = Arc::clone(self);
        let handler: MessageHandler = Arc::new(move |message| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move { orchestrator.handle_message(message).await })
        });

        let subscription_id = self.queue.subscribe(topics::RAW_LISTINGS, handler).await?;
        *self.subscription_id.lock().await = Some(subscription_id);

        log::info!("Processing orchestrator started");
        Ok(())
    }

    /// Stop accepting deliveries; in-flight handlers finish first.
    pub async fn stop(&self) -> crate::queue::api::QueueResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(subscription_id) = self.subscription_id.lock().await.take() {
            self.queue.unsubscribe(&subscription_id).await?;
        }
        log::info!("Processing orchestrator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn health(&self) -> OrchestratorHealth {
        OrchestratorHealth {
            running: self.is_running(),
            queue: self.queue.health_check().await,
            statistics: self.stats.snapshot(),
        }
    }

    /// Queue-facing entry point for one delivery.
    async fn handle_message(self: Arc<Self>, message: QueueMessage) -> Result<(), HandlerError> {
        let event: RawListingEvent = match message.decode() {
            Ok(event) => event,
            Err(error) => {
                // Unparseable payloads can never succeed; dead-letter the raw
                // message as-is.
                log::error!(
                    "Dropping undecodable message {} from '{}': {}",
                    message.message_id,
                    message.topic,
                    error
                );
                self.stats.record_failed();
                return Err(HandlerError::discard(error.to_string()));
            }
        };

        let ctx = event.envelope.trace_context();
        trace::scope(ctx, self.handle_raw_event(event)).await;
        // The orchestrator settles every outcome itself (retry re-publish or
        // failure events), so the delivery always acks.
        Ok(())
    }

    async fn handle_raw_event(self: &Arc<Self>, event: RawListingEvent) {
        let start = Instant::now();
        log::info!(
            "Processing event {} from {} (retry {}/{})",
            event.envelope.event_id,
            event.envelope.source_platform,
            event.envelope.retry_count,
            event.envelope.max_retries
        );

        let outcome = tokio::time::timeout(
            self.config.listing_deadline,
            self.process_event(&event, start),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                let elapsed = start.elapsed();
                self.stats.record_processed(elapsed.as_micros() as u64);
                log::info!(
                    "Completed processing event {} in {:.2}ms",
                    event.envelope.event_id,
                    elapsed.as_secs_f64() * 1000.0
                );
            }
            Ok(Err(failure)) => {
                self.handle_failure(&event, failure).await;
            }
            Err(_) => {
                self.handle_failure(&event, PipelineFailure::deadline(self.config.listing_deadline))
                    .await;
            }
        }
    }

    /// Pipeline, validation, scoring, and event emission for one raw event.
    async fn process_event(
        self: &Arc<Self>,
        event: &RawListingEvent,
        start: Instant,
    ) -> Result<(), PipelineFailure> {
        let (document, stages) = self.run_pipeline(event).await?;

        // The pipeline output must now be a valid normalized listing
        let listing: Listing = serde_json::from_value(document).map_err(|e| {
            PipelineFailure::permanent(
                "validation",
                None,
                format!("pipeline output is not a valid listing: {}", e),
            )
        })?;
        let violations = listing.validate();
        if !violations.is_empty() {
            return Err(PipelineFailure::permanent(
                "validation",
                None,
                format!("listing violates invariants: {}", violations.join("; ")),
            ));
        }

        let fraud = self.scoring.score(&listing).await;

        let mut processed_envelope =
            EventEnvelope::child_of(&event.envelope, EventType::ListingProcessed);
        processed_envelope.status = EventStatus::Completed;

        let processed = ProcessedListingEvent {
            envelope: processed_envelope,
            listing: listing.clone(),
            fraud_score: fraud.fraud_score,
            risk_level: fraud.risk_level,
            signals: fraud.signals.clone(),
            processing_stages: stages.clone(),
            processing_duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            plugins_applied: stages,
        };

        self.publish_event(topics::PROCESSED_LISTINGS, &processed)
            .await
            .map_err(|e| PipelineFailure::transient("publish", None, e.to_string()))?;

        if fraud.risk_level == RiskLevel::Fraud {
            let mut fraud_envelope =
                EventEnvelope::child_of(&processed.envelope, EventType::FraudDetected);
            fraud_envelope.status = EventStatus::Completed;
            let detected_by = fraud.detected_by();
            let alert = FraudDetectedEvent {
                envelope: fraud_envelope,
                listing_id: listing.listing_id.clone(),
                listing_url: listing.source.url.clone(),
                fraud_score: fraud.fraud_score,
                risk_level: fraud.risk_level,
                signals: fraud.signals,
                detected_by,
                confidence: fraud.confidence,
            };
            self.publish_event(topics::FRAUD_DETECTED, &alert)
                .await
                .map_err(|e| PipelineFailure::transient("publish", None, e.to_string()))?;
            log::warn!(
                "Fraud detected on listing {} (score {:.1})",
                listing.listing_id,
                fraud.fraud_score
            );
        }

        Ok(())
    }

    /// Run the enabled processing plugins in priority order, fail-fast.
    async fn run_pipeline(
        &self,
        event: &RawListingEvent,
    ) -> Result<(serde_json::Value, Vec<String>), PipelineFailure> {
        let entries = self.registry.enabled_processing().await;
        if entries.is_empty() {
            log::warn!("No processing plugins enabled");
            return Ok((event.raw_data.clone(), Vec::new()));
        }

        let mut document = event.raw_data.clone();
        let mut stages = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(processor) = entry.instance.as_processing() else {
                continue;
            };
            let stage = processor.stage_name().to_string();
            log::debug!("Executing plugin: {}", entry.plugin_id);

            let stage_start = Instant::now();
            self.stats.record_plugin_execution();
            entry.stats.record_execution();

            match processor.process(document).await {
                Ok(next) => {
                    document = next;
                    log::debug!(
                        "Plugin {} completed in {:.2}ms",
                        entry.plugin_id,
                        stage_start.elapsed().as_secs_f64() * 1000.0
                    );
                    stages.push(stage);
                }
                Err(error) => {
                    entry.stats.record_failure();
                    let failure = if error.is_permanent() {
                        PipelineFailure::permanent(
                            &stage,
                            Some(entry.plugin_id.clone()),
                            error.message().to_string(),
                        )
                    } else {
                        PipelineFailure::transient(
                            &stage,
                            Some(entry.plugin_id.clone()),
                            error.message().to_string(),
                        )
                    };
                    return Err(failure);
                }
            }
        }

        Ok((document, stages))
    }

    /// Retry policy: transient failures re-publish to the raw topic until the
    /// retry budget is spent; permanent failures and exhausted budgets emit a
    /// processing-failed event and a dead-letter entry.
    async fn handle_failure(self: &Arc<Self>, event: &RawListingEvent, failure: PipelineFailure) {
        let envelope = &event.envelope;
        let can_retry = !failure.permanent && envelope.retry_count < envelope.max_retries;

        if can_retry {
            let mut retry = event.clone();
            retry.envelope.retry_count += 1;
            retry.envelope.status = EventStatus::Retry;

            match self.publish_event(topics::RAW_LISTINGS, &retry).await {
                Ok(_) => {
                    self.stats.record_retry();
                    log::info!(
                        "Requeued event {} (retry {}/{}): {}",
                        envelope.event_id,
                        retry.envelope.retry_count,
                        retry.envelope.max_retries,
                        failure.message
                    );
                    return;
                }
                Err(error) => {
                    log::error!(
                        "Failed to requeue event {}: {}; routing to dead letter",
                        envelope.event_id,
                        error
                    );
                }
            }
        }

        self.stats.record_failed();

        let original_event =
            serde_json::to_value(event).unwrap_or_else(|_| serde_json::Value::Null);
        let mut failed_envelope = EventEnvelope::child_of(envelope, EventType::ProcessingFailed);
        failed_envelope.status = EventStatus::Failed;

        let failed = ProcessingFailedEvent {
            envelope: failed_envelope,
            error_kind: failure.error_kind.to_string(),
            error_message: failure.message.clone(),
            failed_stage: failure.failed_stage.clone(),
            failed_plugin: failure.failed_plugin.clone(),
            original_event: original_event.clone(),
            is_recoverable: !failure.permanent,
        };

        if let Err(error) = self.publish_event(topics::PROCESSING_FAILED, &failed).await {
            log::error!(
                "Failed to publish processing-failed event for {}: {}",
                envelope.event_id,
                error
            );
        }
        if let Err(error) = self.publish_event(topics::DEAD_LETTER, &failed).await {
            log::error!(
                "Failed to dead-letter event {}: {}",
                envelope.event_id,
                error
            );
        }

        log::error!(
            "Event {} failed permanently at stage '{}' after {} retries: {}",
            envelope.event_id,
            failure.failed_stage,
            envelope.retry_count,
            failure.message
        );
    }

    async fn publish_event<T: Serialize>(
        &self,
        topic: &str,
        event: &T,
    ) -> crate::queue::api::QueueResult<String> {
        let message = QueueMessage::encode(topic, event)?;
        self.queue.publish(topic, message).await
    }
}
