//! Analyser: detector registry, deduplication, and verification.
//!
//! Snapshots arrive over the Collector's streaming RPC. For each one the
//! detector registry runs in registration order; surviving detections are
//! deduplicated against Knowledge and published on the bus. The verification
//! cycle tick runs after all detections for a snapshot have been processed,
//! so grace-period arithmetic is well-defined.

pub mod detectors;
pub mod verification;

pub use detectors::{Detector, DetectorRegistry};
pub use verification::{
    PendingVerification, ResolutionSink, RollbackSink, VerificationTracker, REFIRE_REASON,
};

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::api::grpc as convert;
use crate::api::proto;
use crate::api::proto::metrics_service_server::MetricsService;
use crate::bus::{decode, subjects, ActionCompletedEvent, EventBus, EventBusExt, RollbackRequest};
use crate::config::AnalyserConfig;
use crate::contracts::{Detection, Snapshot};
use crate::knowledge::KnowledgeApi;
use crate::observability::{metrics, MedicEvent};

// ═══════════════════════════════════════════════════════════════════════════════
// Observer Wiring
// ═══════════════════════════════════════════════════════════════════════════════

/// Publishes rollback requests on the bus when verification fails.
///
/// The tracker invokes observers synchronously after releasing its lock; the
/// publish itself is spawned so tracker callers never wait on the bus.
pub struct BusRollbackSink {
    bus: Arc<dyn EventBus>,
}

impl BusRollbackSink {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

impl RollbackSink for BusRollbackSink {
    fn rollback_needed(&self, entry: &PendingVerification, reason: &str) {
        let bus = self.bus.clone();
        let request = RollbackRequest::new(
            entry.database_id.clone(),
            entry.action_id.clone(),
            entry.detection_id.clone(),
            entry.detection_key.clone(),
            entry.action_type.clone(),
            reason,
        );

        MedicEvent::RollbackRequested {
            action_id: entry.action_id.clone(),
            detection_id: entry.detection_id.clone(),
            reason: reason.to_string(),
        }
        .log();
        metrics::record_rollback_requested();

        tokio::spawn(async move {
            if let Err(e) = bus
                .publish_json(subjects::ROLLBACK_REQUESTED, &request)
                .await
            {
                warn!(error = %e, "Rollback request publish failed");
                metrics::record_bus_publish_failure(subjects::ROLLBACK_REQUESTED);
            }
        });
    }
}

/// Logs resolutions and counts them.
pub struct LoggingResolutionSink;

impl ResolutionSink for LoggingResolutionSink {
    fn verified(&self, entry: &PendingVerification) {
        MedicEvent::VerificationResolved {
            detection_id: entry.detection_id.clone(),
            cycles: entry.elapsed_cycles,
        }
        .log();
        metrics::record_verification_resolved();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Analyser Core
// ═══════════════════════════════════════════════════════════════════════════════

/// The Analyser's processing pipeline, shared by the RPC handler and the
/// event-bus subscribers.
pub struct Analyser {
    knowledge: Arc<dyn KnowledgeApi>,
    bus: Arc<dyn EventBus>,
    registry: RwLock<DetectorRegistry>,
    tracker: Arc<VerificationTracker>,
}

impl Analyser {
    /// Wire the analyser: the tracker owns only abstract observers, with the
    /// concrete bus publisher injected here.
    pub fn new(
        config: &AnalyserConfig,
        knowledge: Arc<dyn KnowledgeApi>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let tracker = Arc::new(VerificationTracker::new(
            &config.verification,
            Arc::new(BusRollbackSink::new(bus.clone())),
            Arc::new(LoggingResolutionSink),
        ));

        let registry = if config.enable_all_detectors {
            DetectorRegistry::with_all(&config.thresholds)
        } else {
            DetectorRegistry::new()
        };

        Self {
            knowledge,
            bus,
            registry: RwLock::new(registry),
            tracker,
        }
    }

    pub fn tracker(&self) -> Arc<VerificationTracker> {
        self.tracker.clone()
    }

    /// Overlay thresholds fetched from Knowledge onto the compiled defaults.
    /// Only strictly positive values override.
    pub async fn refresh_thresholds(&self, compiled: &crate::contracts::Thresholds) {
        match self.knowledge.get_system_config().await {
            Ok(config) => {
                let mut thresholds = compiled.clone();
                thresholds.merge_overrides(&config.thresholds);
                self.registry.write().apply_thresholds(&thresholds);
                info!("Detector thresholds refreshed from knowledge");
            }
            Err(e) => {
                warn!(error = %e, "Threshold refresh failed; using compiled defaults");
            }
        }
    }

    /// Process one snapshot: run detectors, dedupe, publish, then advance the
    /// verification clock.
    pub async fn process_snapshot(&self, snapshot: Snapshot) {
        let started = Instant::now();
        let detections = self.registry.read().detect_all(&snapshot);

        for detection in detections {
            self.handle_detection(detection).await;
        }

        // The cycle tick runs after all detections for this snapshot, so the
        // grace arithmetic sees a consistent count.
        self.tracker.on_collection_cycle();

        metrics::record_snapshot_processing(started.elapsed().as_secs_f64());
    }

    async fn handle_detection(&self, detection: Detection) {
        let key = detection.key();

        // Pending verification wins over everything: a re-fire is either
        // grace-period noise or a failed action.
        if self.tracker.on_detection_fired(&key) {
            metrics::record_detection_suppressed("verification");
            return;
        }

        // Dedup against knowledge; a knowledge outage degrades to no dedup
        // rather than blocking the publish.
        match self.knowledge.is_detection_active(&key).await {
            Ok(true) => {
                debug!(key = %key, "Active detection exists; suppressed");
                metrics::record_detection_suppressed("dedup");
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Dedup lookup failed; publishing anyway"),
        }

        // Registration and publish are best-effort independent.
        if let Err(e) = self.knowledge.register_detection(&detection).await {
            warn!(error = %e, "Detection registration failed");
        }
        if let Err(e) = self.bus.publish_json(subjects::DETECTIONS, &detection).await {
            warn!(error = %e, "Detection publish failed");
            metrics::record_bus_publish_failure(subjects::DETECTIONS);
        }

        MedicEvent::DetectionRaised {
            detection_id: detection.id.clone(),
            detector: detection.detector_name.clone(),
            severity: detection.severity.to_string(),
            key,
        }
        .log();
        metrics::record_detection_raised(&detection.detector_name);
    }

    /// Consume action-completion events: persist the solution verbatim and
    /// start verification under the detection key.
    pub async fn run_completion_subscriber(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> crate::error::Result<()> {
        let mut rx = self.bus.subscribe(subjects::ACTIONS_COMPLETED).await?;
        info!("Listening for action completions");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                payload = rx.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    let event: ActionCompletedEvent = match decode(&payload) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Undecodable completion event");
                            continue;
                        }
                    };
                    self.handle_completion(event).await;
                }
            }
        }
    }

    async fn handle_completion(&self, event: ActionCompletedEvent) {
        debug!(action_id = %event.action_id, "Action completed");

        if let Err(e) = self
            .knowledge
            .mark_detection_resolved(&event.detection_id, &event.solution)
            .await
        {
            warn!(error = %e, detection_id = %event.detection_id, "Resolution failed");
        }

        if !event.detection_key.is_empty() {
            self.tracker.add(
                event.detection_key,
                event.detection_id,
                event.action_id,
                event.action_type,
                event.database_id,
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// gRPC Surface
// ═══════════════════════════════════════════════════════════════════════════════

/// Serves `MetricsService` over the analyser core.
pub struct MetricsRpcService {
    analyser: Arc<Analyser>,
}

impl MetricsRpcService {
    pub fn new(analyser: Arc<Analyser>) -> Self {
        Self { analyser }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsRpcService {
    async fn stream_metrics(
        &self,
        request: Request<Streaming<proto::MetricSnapshot>>,
    ) -> Result<Response<proto::StreamMetricsAck>, Status> {
        let mut stream = request.into_inner();
        let mut total: u64 = 0;

        while let Some(message) = stream.next().await {
            match message {
                Ok(msg) => {
                    let snapshot = convert::from_proto_snapshot(msg);
                    self.analyser.process_snapshot(snapshot).await;
                    total += 1;
                }
                Err(status) => {
                    warn!(error = %status, total = total, "Metric stream broke");
                    break;
                }
            }
        }

        info!(total = total, "Metric stream ended");
        Ok(Response::new(proto::StreamMetricsAck {
            total,
            status: "ok".to_string(),
        }))
    }

    async fn register_database(
        &self,
        request: Request<proto::DatabaseInfo>,
    ) -> Result<Response<proto::RegisterDatabaseAck>, Status> {
        let database = convert::from_proto_database(request.into_inner());
        let assigned_id = self
            .analyser
            .knowledge
            .register_database(&database)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(proto::RegisterDatabaseAck {
            success: true,
            assigned_id,
            message: String::new(),
        }))
    }
}
