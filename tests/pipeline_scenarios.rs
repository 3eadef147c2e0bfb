//! End-to-end pipeline scenarios over the in-memory queue: raw event in,
//! processed/fraud/failure events out, with retry and dead-letter routing.

use fraudsift::core::trace::TraceContext;
use fraudsift::manifest::PluginManifest;
use fraudsift::model::event::{
    topics, EventEnvelope, EventType, FraudDetectedEvent, ProcessedListingEvent,
    ProcessingFailedEvent, RawListingEvent,
};
use fraudsift::model::risk::{RiskLevel, RiskSignal};
use fraudsift::pipeline::{OrchestratorConfig, ProcessingOrchestrator};
use fraudsift::plugin::api::{
    DetectionPlugin, DetectionResult, Plugin, PluginInstance, PluginManager, PluginResult,
    ProcessingError, ProcessingPlugin,
};
use fraudsift::queue::api::{EventQueue, InMemoryQueue, MessageHandler, QueueMessage};
use fraudsift::scoring::RiskScoringOrchestrator;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

// ---------------------------------------------------------------------------
// Test plugins
// ---------------------------------------------------------------------------

/// Processing stage that passes the document through untouched.
struct PassthroughStage {
    stage: &'static str,
}

#[async_trait::async_trait]
impl Plugin for PassthroughStage {}

#[async_trait::async_trait]
impl ProcessingPlugin for PassthroughStage {
    fn stage_name(&self) -> &str {
        self.stage
    }

    async fn process(
        &self,
        document: serde_json::Value,
    ) -> Result<serde_json::Value, ProcessingError> {
        Ok(document)
    }
}

/// Processing stage that fails a configurable number of times first.
struct FlakyStage {
    stage: &'static str,
    fail_times: u32,
    permanent: bool,
    attempts: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl Plugin for FlakyStage {}

#[async_trait::async_trait]
impl ProcessingPlugin for FlakyStage {
    fn stage_name(&self) -> &str {
        self.stage
    }

    async fn process(
        &self,
        document: serde_json::Value,
    ) -> Result<serde_json::Value, ProcessingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            if self.permanent {
                Err(ProcessingError::permanent("unrecoverable payload"))
            } else {
                Err(ProcessingError::transient("upstream timeout"))
            }
        } else {
            Ok(document)
        }
    }
}

/// Detection plugin returning a fixed score with one confident signal.
struct ScriptedDetector {
    plugin_id: &'static str,
    score: f64,
}

#[async_trait::async_trait]
impl Plugin for ScriptedDetector {}

#[async_trait::async_trait]
impl DetectionPlugin for ScriptedDetector {
    async fn analyze(
        &self,
        _listing: &fraudsift::model::listing::Listing,
    ) -> PluginResult<DetectionResult> {
        Ok(DetectionResult {
            overall_score: self.score,
            confidence: Some(0.9),
            signals: vec![RiskSignal {
                signal_type: "scripted".to_string(),
                score: self.score,
                confidence: 0.9,
                plugin_id: self.plugin_id.to_string(),
                reason: "scripted result".to_string(),
                evidence: BTreeMap::new(),
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Collected<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: DeserializeOwned + Send + 'static> Collected<T> {
    async fn subscribe(queue: &Arc<dyn EventQueue>, topic: &str) -> Self {
        let events: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: MessageHandler = Arc::new(move |message: QueueMessage| {
            let sink = sink.clone();
            Box::pin(async move {
                if let Ok(event) = message.decode::<T>() {
                    sink.lock().unwrap().push(event);
                }
                Ok(())
            })
        });
        queue.subscribe(topic, handler).await.unwrap();
        Self { events }
    }

    fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn take(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.events.lock().unwrap().clone()
    }
}

struct Harness {
    manager: PluginManager,
    queue: Arc<dyn EventQueue>,
    orchestrator: Arc<ProcessingOrchestrator>,
    processed: Collected<ProcessedListingEvent>,
    frauds: Collected<FraudDetectedEvent>,
    failures: Collected<ProcessingFailedEvent>,
}

fn manifest(id: &str, kind: &str, module: &str, class: &str, extra: &str) -> PluginManifest {
    let text = format!(
        "id: {id}\nname: {id}\nversion: 1.0.0\nkind: {kind}\napi_version: \"1.0\"\ndescription: test plugin\nentrypoint:\n  module: {module}\n  class: {class}\n{extra}"
    );
    PluginManifest::parse_str(&text).unwrap()
}

impl Harness {
    /// Build a harness; `setup` registers factories on the manager, then the
    /// listed manifests are loaded and enabled.
    async fn new(
        setup: impl FnOnce(&mut PluginManager),
        manifests: Vec<PluginManifest>,
    ) -> Harness {
        let mut manager = PluginManager::new(fraudsift::get_core_api_version());
        setup(&mut manager);

        for m in manifests {
            let id = m.id.clone();
            manager.register_manifest(m, None).await.unwrap();
            manager.enable(&id).await.unwrap();
        }

        let queue: Arc<dyn EventQueue> = Arc::new(InMemoryQueue::new());
        queue.connect().await.unwrap();

        let processed = Collected::subscribe(&queue, topics::PROCESSED_LISTINGS).await;
        let frauds = Collected::subscribe(&queue, topics::FRAUD_DETECTED).await;
        let failures = Collected::subscribe(&queue, topics::PROCESSING_FAILED).await;

        let registry = manager.registry().clone();
        let orchestrator = ProcessingOrchestrator::new(
            registry.clone(),
            queue.clone(),
            RiskScoringOrchestrator::new(registry),
            OrchestratorConfig::default(),
        );
        orchestrator.start().await.unwrap();

        Harness {
            manager,
            queue,
            orchestrator,
            processed,
            frauds,
            failures,
        }
    }

    async fn publish_raw(&self, event: &RawListingEvent) {
        let message = QueueMessage::encode(topics::RAW_LISTINGS, event).unwrap();
        self.queue.publish(topics::RAW_LISTINGS, message).await.unwrap();
    }

    async fn shutdown(self) {
        self.orchestrator.stop().await.unwrap();
        self.queue.disconnect().await.unwrap();
    }
}

fn raw_event(listing_id: &str) -> RawListingEvent {
    let ctx = TraceContext::new();
    RawListingEvent {
        envelope: EventEnvelope::new(
            EventType::RawListing,
            "plugin-source-idealista",
            "idealista",
            &ctx,
        ),
        raw_data: serde_json::json!({
            "id": listing_id,
            "platform": "idealista",
            "price": 500000,
            "currency": "EUR",
            "city": "Lisboa",
            "country": "PT",
            "area": 96.0,
            "description": "Bright T3 near the river",
        }),
        source_url: Some(format!("https://example.test/{}", listing_id)),
        scraped_at: chrono::Utc::now(),
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {}", what));
}

fn three_stage_pipeline(manager: &mut PluginManager) {
    manager.factories_mut().register("test.stage", "Geocode", || {
        PluginInstance::Processing(Box::new(PassthroughStage { stage: "geocode" }))
    });
    manager.factories_mut().register("test.stage", "Enrich", || {
        PluginInstance::Processing(Box::new(PassthroughStage { stage: "enrich" }))
    });
}

fn detector_pair(manager: &mut PluginManager, score_a: f64, score_b: f64) {
    manager.factories_mut().register("test.detect", "A", move || {
        PluginInstance::Detection(Box::new(ScriptedDetector {
            plugin_id: "plugin-detection-a",
            score: score_a,
        }))
    });
    manager.factories_mut().register("test.detect", "B", move || {
        PluginInstance::Detection(Box::new(ScriptedDetector {
            plugin_id: "plugin-detection-b",
            score: score_b,
        }))
    });
}

fn standard_manifests(weight_a: f64, weight_b: f64) -> Vec<PluginManifest> {
    vec![
        manifest(
            "plugin-processing-normalizer",
            "processing",
            "builtin.normalize",
            "NormalizerPlugin",
            "priority: 1\n",
        ),
        manifest(
            "plugin-processing-geocoder",
            "processing",
            "test.stage",
            "Geocode",
            "priority: 2\n",
        ),
        manifest(
            "plugin-processing-enricher",
            "processing",
            "test.stage",
            "Enrich",
            "priority: 3\n",
        ),
        manifest(
            "plugin-detection-a",
            "detection",
            "test.detect",
            "A",
            &format!("weight: {}\n", weight_a),
        ),
        manifest(
            "plugin-detection-b",
            "detection",
            "test.detect",
            "B",
            &format!("weight: {}\n", weight_b),
        ),
    ]
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_pipeline_emits_one_processed_event() {
    let harness = Harness::new(
        |manager| {
            three_stage_pipeline(manager);
            detector_pair(manager, 0.1, 0.2);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    let raw = raw_event("L1");
    harness.publish_raw(&raw).await;

    wait_until("one processed event", || harness.processed.len() == 1).await;
    sleep(Duration::from_millis(100)).await;

    let events = harness.processed.take();
    assert_eq!(events.len(), 1);
    let processed = &events[0];

    assert_eq!(
        processed.processing_stages,
        vec!["normalize", "geocode", "enrich"]
    );
    assert!((processed.fraud_score - 15.0).abs() < 1e-9);
    assert_eq!(processed.risk_level, RiskLevel::Safe);
    assert_eq!(processed.listing.listing_id, "L1");
    assert_eq!(processed.listing.price.amount, 500000.0);
    assert_eq!(processed.listing.location.city.as_deref(), Some("Lisboa"));

    // Lineage and trace propagation
    assert_eq!(
        processed.envelope.parent_event_id.as_deref(),
        Some(raw.envelope.event_id.as_str())
    );
    assert_eq!(processed.envelope.trace_id, raw.envelope.trace_id);
    assert_eq!(processed.envelope.request_id, raw.envelope.request_id);

    // No fraud alert for a safe listing
    assert_eq!(harness.frauds.len(), 0);
    assert_eq!(harness.failures.len(), 0);

    let stats = harness.orchestrator.statistics();
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.plugins_executed, 3);

    harness.shutdown().await;
}

#[tokio::test]
async fn fraud_flag_emits_alert_with_lineage() {
    let harness = Harness::new(
        |manager| {
            three_stage_pipeline(manager);
            detector_pair(manager, 0.9, 0.8);
        },
        standard_manifests(0.6, 0.4),
    )
    .await;

    harness.publish_raw(&raw_event("L1")).await;

    wait_until("fraud alert", || harness.frauds.len() == 1).await;
    wait_until("processed event", || harness.processed.len() == 1).await;

    let processed = harness.processed.take().remove(0);
    let fraud = harness.frauds.take().remove(0);

    // 0.9 * 0.6 + 0.8 * 0.4 = 0.86 -> 86
    assert!((processed.fraud_score - 86.0).abs() < 1e-9);
    assert_eq!(processed.risk_level, RiskLevel::Fraud);

    assert!((fraud.fraud_score - 86.0).abs() < 1e-9);
    assert_eq!(fraud.risk_level, RiskLevel::Fraud);
    assert_eq!(fraud.listing_id, "L1");

    // The alert is a child of the processed event
    assert_eq!(
        fraud.envelope.parent_event_id.as_deref(),
        Some(processed.envelope.event_id.as_str())
    );
    assert_eq!(fraud.envelope.trace_id, processed.envelope.trace_id);
    assert_eq!(fraud.detected_by.len(), 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn transient_failure_retries_until_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_factory = attempts.clone();

    let harness = Harness::new(
        |manager| {
            let attempts = attempts_for_factory.clone();
            manager.factories_mut().register("test.stage", "Geocode", move || {
                PluginInstance::Processing(Box::new(FlakyStage {
                    stage: "geocode",
                    fail_times: 2,
                    permanent: false,
                    attempts: attempts.clone(),
                }))
            });
            manager.factories_mut().register("test.stage", "Enrich", || {
                PluginInstance::Processing(Box::new(PassthroughStage { stage: "enrich" }))
            });
            detector_pair(manager, 0.1, 0.1);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    harness.publish_raw(&raw_event("L1")).await;

    wait_until("processed after retries", || harness.processed.len() == 1).await;
    sleep(Duration::from_millis(100)).await;

    // Failed twice, succeeded on the third delivery
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(harness.processed.len(), 1);
    assert_eq!(harness.failures.len(), 0);
    assert_eq!(harness.queue.queue_size(topics::DEAD_LETTER).await.unwrap(), 0);

    let stats = harness.orchestrator.statistics();
    assert_eq!(stats.events_retried, 2);
    assert_eq!(stats.events_processed, 1);
    assert_eq!(stats.events_failed, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn permanent_failure_skips_retry_and_dead_letters() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_factory = attempts.clone();

    let harness = Harness::new(
        |manager| {
            let attempts = attempts_for_factory.clone();
            manager.factories_mut().register("test.stage", "Geocode", move || {
                PluginInstance::Processing(Box::new(FlakyStage {
                    stage: "geocode",
                    fail_times: u32::MAX,
                    permanent: true,
                    attempts: attempts.clone(),
                }))
            });
            manager.factories_mut().register("test.stage", "Enrich", || {
                PluginInstance::Processing(Box::new(PassthroughStage { stage: "enrich" }))
            });
            detector_pair(manager, 0.1, 0.1);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    harness.publish_raw(&raw_event("L1")).await;

    wait_until("one failure event", || harness.failures.len() == 1).await;
    sleep(Duration::from_millis(100)).await;

    // No retries for a permanent error
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.processed.len(), 0);
    assert_eq!(harness.failures.len(), 1);
    assert_eq!(harness.queue.queue_size(topics::DEAD_LETTER).await.unwrap(), 1);

    let failure = harness.failures.take().remove(0);
    assert_eq!(failure.error_kind, "permanent_error");
    assert_eq!(failure.failed_stage, "geocode");
    assert_eq!(
        failure.failed_plugin.as_deref(),
        Some("plugin-processing-geocoder")
    );
    assert!(!failure.is_recoverable);
    // Enough context to replay manually
    assert_eq!(failure.original_event["raw_data"]["id"], "L1");

    harness.shutdown().await;
}

#[tokio::test]
async fn retries_exhausted_goes_to_dead_letter_once() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_for_factory = attempts.clone();

    let harness = Harness::new(
        |manager| {
            let attempts = attempts_for_factory.clone();
            manager.factories_mut().register("test.stage", "Geocode", move || {
                PluginInstance::Processing(Box::new(FlakyStage {
                    stage: "geocode",
                    fail_times: u32::MAX,
                    permanent: false,
                    attempts: attempts.clone(),
                }))
            });
            manager.factories_mut().register("test.stage", "Enrich", || {
                PluginInstance::Processing(Box::new(PassthroughStage { stage: "enrich" }))
            });
            detector_pair(manager, 0.1, 0.1);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    harness.publish_raw(&raw_event("L1")).await;

    wait_until("failure after exhausted retries", || {
        harness.failures.len() == 1
    })
    .await;
    sleep(Duration::from_millis(200)).await;

    // Initial delivery + max_retries (3) re-deliveries
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    // Exactly once on processing.failed and once in the dead letter queue
    assert_eq!(harness.failures.len(), 1);
    assert_eq!(harness.queue.queue_size(topics::DEAD_LETTER).await.unwrap(), 1);
    assert_eq!(harness.processed.len(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn processing_same_event_twice_is_deterministic() {
    let harness = Harness::new(
        |manager| {
            three_stage_pipeline(manager);
            detector_pair(manager, 0.4, 0.2);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    let raw = raw_event("L1");
    harness.publish_raw(&raw).await;
    harness.publish_raw(&raw).await;

    wait_until("two processed events", || harness.processed.len() == 2).await;

    let events = harness.processed.take();
    assert_eq!(events[0].listing, events[1].listing);
    assert_eq!(events[0].fraud_score, events[1].fraud_score);
    assert_eq!(events[0].risk_level, events[1].risk_level);
    assert_eq!(events[0].processing_stages, events[1].processing_stages);
    // Both point back at the same raw event
    assert_eq!(events[0].envelope.parent_event_id, events[1].envelope.parent_event_id);

    harness.shutdown().await;
}

#[tokio::test]
async fn undecodable_payload_is_discarded_to_backend_dead_letter() {
    let harness = Harness::new(
        |manager| {
            three_stage_pipeline(manager);
            detector_pair(manager, 0.1, 0.1);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    harness
        .queue
        .publish(
            topics::RAW_LISTINGS,
            QueueMessage::new(topics::RAW_LISTINGS, "this is not an event"),
        )
        .await
        .unwrap();

    wait_until("backend dead letter entry", || {
        harness.queue.statistics().dead_lettered == 1
    })
    .await;

    let dead = harness.queue.dead_letter_messages(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, "this is not an event");
    assert_eq!(harness.processed.len(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn disabled_processing_plugin_is_skipped() {
    let harness = Harness::new(
        |manager| {
            three_stage_pipeline(manager);
            detector_pair(manager, 0.1, 0.1);
        },
        standard_manifests(0.5, 0.5),
    )
    .await;

    harness
        .manager
        .disable("plugin-processing-enricher")
        .await
        .unwrap();

    harness.publish_raw(&raw_event("L1")).await;
    wait_until("processed without enrich", || harness.processed.len() == 1).await;

    let processed = harness.processed.take().remove(0);
    assert_eq!(processed.processing_stages, vec!["normalize", "geocode"]);

    harness.shutdown().await;
}
