//! Detector behaviour against concrete snapshots.
//!
//! Covers the end-to-end detection expectations: severity ladders, action
//! plans, metadata, and deduplication keys.

mod common;

use medic_core::analyser::DetectorRegistry;
use medic_core::contracts::snapshot::keys;
use medic_core::contracts::{ActionPlan, IndexPriority, Severity, Thresholds};

use common::snapshot;

fn registry() -> DetectorRegistry {
    DetectorRegistry::with_all(&Thresholds::default())
}

#[test]
fn cache_starvation_yields_info_recommendation() {
    let mut s = snapshot();
    s.measurements.cache_hit_rate = Some(0.85);

    let detections = registry().detect_all(&s);
    assert_eq!(detections.len(), 1);

    let d = &detections[0];
    assert_eq!(d.severity, Severity::Info);
    assert_eq!(d.key(), "db-1:cache_miss_rate_high:cache");
    assert_eq!(d.action_type(), "cache_optimization_recommendation");
}

#[test]
fn saturated_pool_yields_critical_pooler_deployment() {
    let mut s = snapshot();
    s.measurements.active_connections = Some(99);
    s.measurements.max_connections = Some(100);

    let detections = registry().detect_all(&s);
    assert_eq!(detections.len(), 1);

    let d = &detections[0];
    assert_eq!(d.severity, Severity::Critical);
    assert_eq!(d.action_type(), "deploy_connection_pooler");
}

#[test]
fn sequential_scan_growth_yields_actionable_index_plan() {
    let s = common::missing_index_snapshot();

    let detections = registry().detect_all(&s);
    assert_eq!(detections.len(), 1);

    let d = &detections[0];
    assert_eq!(
        d.evidence.get("sequential_scans_delta").map(String::as_str),
        Some("50")
    );
    assert_eq!(
        d.plan,
        ActionPlan::CreateIndex {
            table_name: "users".to_string(),
            column_name: "email".to_string(),
            priority: IndexPriority::High,
        }
    );

    let metadata = d.plan.metadata();
    assert_eq!(metadata.get("table_name").map(String::as_str), Some("users"));
    assert_eq!(metadata.get("column_name").map(String::as_str), Some("email"));
    assert_eq!(metadata.get("priority").map(String::as_str), Some("high"));
}

#[test]
fn aged_idle_transaction_is_terminated_forcefully() {
    let mut s = snapshot();
    s.extended.insert(keys::IDLE_TXN_SECS.to_string(), 1200.0);
    s.labels
        .insert(keys::IDLE_TXN_PID.to_string(), "7001".to_string());

    let detections = registry().detect_all(&s);
    assert_eq!(detections.len(), 1);

    let d = &detections[0];
    assert_eq!(d.severity, Severity::Critical);
    assert_eq!(d.action_type(), "terminate_query");
    assert_eq!(
        d.plan,
        ActionPlan::TerminateQuery {
            pid: 7001,
            graceful: false
        }
    );
}

#[test]
fn detectors_run_in_registration_order() {
    // A snapshot tripping several detectors at once keeps a stable order:
    // missing_index, high_latency, cache_miss, connection_pool.
    let mut s = common::missing_index_snapshot();
    s.measurements.avg_latency_ms = Some(400.0);
    s.measurements.cache_hit_rate = Some(0.60);
    s.measurements.active_connections = Some(99);
    s.measurements.max_connections = Some(100);

    let detections = registry().detect_all(&s);
    let names: Vec<&str> = detections
        .iter()
        .map(|d| d.detector_name.as_str())
        .collect();

    assert_eq!(
        names,
        vec![
            "missing_index",
            "high_latency",
            "cache_miss_rate_high",
            "connection_pool_saturation",
        ]
    );
}

#[test]
fn thresholds_from_config_are_respected() {
    let thresholds = Thresholds {
        cache_hit_ratio: 0.50,
        ..Thresholds::default()
    };
    let registry = DetectorRegistry::with_all(&thresholds);

    let mut s = snapshot();
    s.measurements.cache_hit_rate = Some(0.85);

    // 0.85 is healthy against the lowered threshold.
    assert!(registry.detect_all(&s).is_empty());
}

#[test]
fn healthy_snapshot_is_silent() {
    let mut s = snapshot();
    s.measurements.active_connections = Some(10);
    s.measurements.max_connections = Some(100);
    s.measurements.cache_hit_rate = Some(0.99);
    s.measurements.avg_latency_ms = Some(5.0);
    s.measurements.sequential_scans = Some(3);

    assert!(registry().detect_all(&s).is_empty());
}
