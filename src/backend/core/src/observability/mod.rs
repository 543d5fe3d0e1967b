//! Observability: tracing, metrics, and structured lifecycle events.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the observability stack for one service binary.
pub fn init(service_name: &str, otlp_endpoint: Option<&str>) -> anyhow::Result<()> {
    if let Some(endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(
                opentelemetry_sdk::trace::config().with_resource(
                    opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                        "service.name",
                        service_name.to_string(),
                    )]),
                ),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(telemetry_layer)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(
            "medic_snapshots_collected_total",
            "Snapshots collected and normalised"
        );
        describe_counter!(
            "medic_snapshots_dropped_total",
            "Collection cycles skipped on adapter failure"
        );
        describe_counter!("medic_detections_raised_total", "Detections published");
        describe_counter!(
            "medic_detections_suppressed_total",
            "Detections suppressed by dedup or pending verification"
        );
        describe_counter!(
            "medic_actions_total",
            "Actions reaching a terminal status, labelled by status"
        );
        describe_counter!(
            "medic_verifications_resolved_total",
            "Verifications completing successfully"
        );
        describe_counter!(
            "medic_rollbacks_requested_total",
            "Rollback requests emitted by the verification tracker"
        );
        describe_counter!(
            "medic_bus_publish_failures_total",
            "Event bus publishes that failed"
        );

        // Gauges
        describe_gauge!(
            "medic_pending_verifications",
            "Verifications awaiting their cycle count"
        );
        describe_gauge!("medic_dispatch_queue_depth", "Actions queued for a worker");
        describe_gauge!("medic_active_actions", "Actions currently executing");

        // Histograms
        describe_histogram!(
            "medic_collect_duration_seconds",
            "Adapter collect duration in seconds"
        );
        describe_histogram!(
            "medic_action_duration_seconds",
            "Action execution duration in seconds"
        );
        describe_histogram!(
            "medic_snapshot_processing_seconds",
            "Analyser per-snapshot processing duration"
        );
    }

    /// Record a completed collection cycle.
    pub fn record_snapshot_collected(duration_secs: f64) {
        counter!("medic_snapshots_collected_total").increment(1);
        histogram!("medic_collect_duration_seconds").record(duration_secs);
    }

    /// Record a skipped collection cycle.
    pub fn record_snapshot_dropped() {
        counter!("medic_snapshots_dropped_total").increment(1);
    }

    /// Record a published detection.
    pub fn record_detection_raised(detector: &str) {
        counter!("medic_detections_raised_total", "detector" => detector.to_string()).increment(1);
    }

    /// Record a suppressed detection.
    pub fn record_detection_suppressed(reason: &'static str) {
        counter!("medic_detections_suppressed_total", "reason" => reason).increment(1);
    }

    /// Record an action reaching a terminal status.
    pub fn record_action_terminal(status: &str, duration_secs: f64) {
        counter!("medic_actions_total", "status" => status.to_string()).increment(1);
        histogram!("medic_action_duration_seconds").record(duration_secs);
    }

    /// Update the pending verification gauge.
    pub fn set_pending_verifications(count: u64) {
        gauge!("medic_pending_verifications").set(count as f64);
    }

    /// Update the dispatch queue depth gauge.
    pub fn set_dispatch_queue_depth(depth: u64) {
        gauge!("medic_dispatch_queue_depth").set(depth as f64);
    }

    /// Update the active action gauge.
    pub fn set_active_actions(count: u64) {
        gauge!("medic_active_actions").set(count as f64);
    }

    /// Record a failed bus publish.
    pub fn record_bus_publish_failure(subject: &str) {
        counter!("medic_bus_publish_failures_total", "subject" => subject.to_string()).increment(1);
    }

    /// Record a successfully resolved verification.
    pub fn record_verification_resolved() {
        counter!("medic_verifications_resolved_total").increment(1);
    }

    /// Record a rollback request emitted by the tracker.
    pub fn record_rollback_requested() {
        counter!("medic_rollbacks_requested_total").increment(1);
    }

    /// Record the analyser's per-snapshot processing time.
    pub fn record_snapshot_processing(duration_secs: f64) {
        histogram!("medic_snapshot_processing_seconds").record(duration_secs);
    }
}

/// Structured event types for logging.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event_type")]
pub enum MedicEvent {
    SnapshotCollected {
        database_id: String,
        overall_score: f64,
        duration_ms: u64,
    },
    DetectionRaised {
        detection_id: String,
        detector: String,
        severity: String,
        key: String,
    },
    ActionQueued {
        action_id: String,
        action_type: String,
        database_id: String,
    },
    ActionCompleted {
        action_id: String,
        action_type: String,
        duration_ms: u64,
    },
    ActionFailed {
        action_id: String,
        action_type: String,
        error: String,
    },
    VerificationResolved {
        detection_id: String,
        cycles: u32,
    },
    RollbackRequested {
        action_id: String,
        detection_id: String,
        reason: String,
    },
    BreakerTripped {
        database_id: String,
        failure_count: u32,
    },
}

impl MedicEvent {
    /// Log this event.
    pub fn log(&self) {
        match self {
            MedicEvent::SnapshotCollected {
                database_id,
                overall_score,
                duration_ms,
            } => {
                tracing::debug!(
                    database_id = %database_id,
                    overall_score = %overall_score,
                    duration_ms = %duration_ms,
                    "Snapshot collected"
                );
            }
            MedicEvent::DetectionRaised {
                detection_id,
                detector,
                severity,
                key,
            } => {
                tracing::info!(
                    detection_id = %detection_id,
                    detector = %detector,
                    severity = %severity,
                    key = %key,
                    "Detection raised"
                );
            }
            MedicEvent::ActionQueued {
                action_id,
                action_type,
                database_id,
            } => {
                tracing::info!(
                    action_id = %action_id,
                    action_type = %action_type,
                    database_id = %database_id,
                    "Action queued"
                );
            }
            MedicEvent::ActionCompleted {
                action_id,
                action_type,
                duration_ms,
            } => {
                tracing::info!(
                    action_id = %action_id,
                    action_type = %action_type,
                    duration_ms = %duration_ms,
                    "Action completed"
                );
            }
            MedicEvent::ActionFailed {
                action_id,
                action_type,
                error,
            } => {
                tracing::error!(
                    action_id = %action_id,
                    action_type = %action_type,
                    error = %error,
                    "Action failed"
                );
            }
            MedicEvent::VerificationResolved {
                detection_id,
                cycles,
            } => {
                tracing::info!(
                    detection_id = %detection_id,
                    cycles = %cycles,
                    "Verification resolved"
                );
            }
            MedicEvent::RollbackRequested {
                action_id,
                detection_id,
                reason,
            } => {
                tracing::warn!(
                    action_id = %action_id,
                    detection_id = %detection_id,
                    reason = %reason,
                    "Rollback requested"
                );
            }
            MedicEvent::BreakerTripped {
                database_id,
                failure_count,
            } => {
                tracing::error!(
                    database_id = %database_id,
                    failure_count = %failure_count,
                    "Sampling circuit breaker tripped"
                );
            }
        }
    }
}
