//! Conversions between wire messages and domain types.
//!
//! Wire enums are plain tag strings; unknown tags degrade to safe defaults so
//! a newer peer never wedges an older one. Typed action plans are flattened
//! to `action_type` + metadata on the way out and parsed back on the way in.

use chrono::{DateTime, Utc};

use super::proto;
use crate::contracts::{
    ActionPlan, ActionRecord, ActionStatus, Category, DatabaseHealth, DatabaseType, Detection,
    Measurements, RegisteredDatabase, Severity, Snapshot, SubScores, SystemConfig, TargetDatabase,
    Thresholds,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Timestamps
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert chrono DateTime to proto Timestamp.
pub fn to_proto_timestamp(dt: DateTime<Utc>) -> proto::Timestamp {
    proto::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

/// Convert proto Timestamp to chrono DateTime.
pub fn from_proto_timestamp(ts: &proto::Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32).unwrap_or_else(Utc::now)
}

fn optional_timestamp(ts: Option<&proto::Timestamp>) -> Option<DateTime<Utc>> {
    ts.filter(|t| t.seconds != 0 || t.nanos != 0)
        .map(from_proto_timestamp)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a domain snapshot to the wire message.
pub fn to_proto_snapshot(snapshot: &Snapshot) -> proto::MetricSnapshot {
    proto::MetricSnapshot {
        database_id: snapshot.database_id.clone(),
        database_type: snapshot.database_type.as_str().to_string(),
        collected_at: Some(to_proto_timestamp(snapshot.collected_at)),
        overall_score: snapshot.overall_score,
        scores: Some(proto::SubScores {
            connection: snapshot.scores.connection,
            query: snapshot.scores.query,
            storage: snapshot.scores.storage,
            cache: snapshot.scores.cache,
        }),
        measurements: Some(proto::Measurements {
            active_connections: snapshot.measurements.active_connections,
            idle_connections: snapshot.measurements.idle_connections,
            max_connections: snapshot.measurements.max_connections,
            waiting_connections: snapshot.measurements.waiting_connections,
            p50_latency_ms: snapshot.measurements.p50_latency_ms,
            p95_latency_ms: snapshot.measurements.p95_latency_ms,
            p99_latency_ms: snapshot.measurements.p99_latency_ms,
            avg_latency_ms: snapshot.measurements.avg_latency_ms,
            sequential_scans: snapshot.measurements.sequential_scans,
            slow_queries: snapshot.measurements.slow_queries,
            storage_used_bytes: snapshot.measurements.storage_used_bytes,
            storage_total_bytes: snapshot.measurements.storage_total_bytes,
            cache_hit_rate: snapshot.measurements.cache_hit_rate,
            cache_hits: snapshot.measurements.cache_hits,
            cache_misses: snapshot.measurements.cache_misses,
        }),
        deltas: snapshot.deltas.clone(),
        seconds_since_previous: snapshot.seconds_since_previous,
        extended: snapshot.extended.clone(),
        labels: snapshot.labels.clone(),
    }
}

/// Convert a wire snapshot to the domain type.
pub fn from_proto_snapshot(msg: proto::MetricSnapshot) -> Snapshot {
    let scores = msg.scores.unwrap_or_default();
    let measurements = msg.measurements.unwrap_or_default();

    Snapshot {
        database_id: msg.database_id,
        database_type: DatabaseType::from_tag(&msg.database_type),
        collected_at: msg
            .collected_at
            .as_ref()
            .map(from_proto_timestamp)
            .unwrap_or_else(Utc::now),
        overall_score: msg.overall_score,
        scores: SubScores {
            connection: scores.connection,
            query: scores.query,
            storage: scores.storage,
            cache: scores.cache,
        },
        measurements: Measurements {
            active_connections: measurements.active_connections,
            idle_connections: measurements.idle_connections,
            max_connections: measurements.max_connections,
            waiting_connections: measurements.waiting_connections,
            p50_latency_ms: measurements.p50_latency_ms,
            p95_latency_ms: measurements.p95_latency_ms,
            p99_latency_ms: measurements.p99_latency_ms,
            avg_latency_ms: measurements.avg_latency_ms,
            sequential_scans: measurements.sequential_scans,
            slow_queries: measurements.slow_queries,
            storage_used_bytes: measurements.storage_used_bytes,
            storage_total_bytes: measurements.storage_total_bytes,
            cache_hit_rate: measurements.cache_hit_rate,
            cache_hits: measurements.cache_hits,
            cache_misses: measurements.cache_misses,
        },
        deltas: msg.deltas,
        seconds_since_previous: msg.seconds_since_previous,
        extended: msg.extended,
        labels: msg.labels,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Detections
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a domain detection to the wire message.
pub fn to_proto_detection(detection: &Detection) -> proto::Detection {
    proto::Detection {
        id: detection.id.clone(),
        detector_name: detection.detector_name.clone(),
        category: detection.category.as_str().to_string(),
        severity: detection.severity.as_str().to_string(),
        database_id: detection.database_id.clone(),
        detected_at: Some(to_proto_timestamp(detection.detected_at)),
        title: detection.title.clone(),
        description: detection.description.clone(),
        recommendation: detection.recommendation.clone(),
        evidence: detection.evidence.clone(),
        action_type: detection.action_type().to_string(),
        action_metadata: detection.plan.metadata(),
        key: detection.key(),
        state: "active".to_string(),
    }
}

/// Convert a wire detection to the domain type.
pub fn from_proto_detection(msg: proto::Detection) -> Detection {
    let plan = ActionPlan::from_tag(&msg.action_type, &msg.action_metadata);

    Detection {
        id: msg.id,
        detector_name: msg.detector_name,
        category: Category::from_tag(&msg.category).unwrap_or(Category::Query),
        severity: Severity::from_tag(&msg.severity).unwrap_or(Severity::Info),
        database_id: msg.database_id,
        detected_at: msg
            .detected_at
            .as_ref()
            .map(from_proto_timestamp)
            .unwrap_or_else(Utc::now),
        title: msg.title,
        description: msg.description,
        recommendation: msg.recommendation,
        evidence: msg.evidence,
        plan,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a domain action record to the wire message.
pub fn to_proto_action(record: &ActionRecord) -> proto::ActionRecord {
    proto::ActionRecord {
        action_id: record.action_id.clone(),
        detection_id: record.detection_id.clone(),
        action_type: record.action_type.clone(),
        database_id: record.database_id.clone(),
        status: record.status.as_str().to_string(),
        message: record.message.clone(),
        error: record.error.clone(),
        created_at: Some(to_proto_timestamp(record.created_at)),
        started_at: record.started_at.map(to_proto_timestamp),
        completed_at: record.completed_at.map(to_proto_timestamp),
        execution_time_ms: record.execution_time_ms.unwrap_or(0),
        changes: record.changes.clone(),
        can_rollback: record.can_rollback,
        rolled_back: record.rolled_back,
    }
}

/// Convert a wire action record to the domain type.
pub fn from_proto_action(msg: proto::ActionRecord) -> ActionRecord {
    ActionRecord {
        action_id: msg.action_id,
        detection_id: msg.detection_id,
        action_type: msg.action_type,
        database_id: msg.database_id,
        status: ActionStatus::from_tag(&msg.status).unwrap_or(ActionStatus::Queued),
        message: msg.message,
        error: msg.error,
        created_at: msg
            .created_at
            .as_ref()
            .map(from_proto_timestamp)
            .unwrap_or_else(Utc::now),
        started_at: optional_timestamp(msg.started_at.as_ref()),
        completed_at: optional_timestamp(msg.completed_at.as_ref()),
        execution_time_ms: (msg.execution_time_ms != 0).then_some(msg.execution_time_ms),
        changes: msg.changes,
        can_rollback: msg.can_rollback,
        rolled_back: msg.rolled_back,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Databases
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert a registered database to the wire message.
pub fn to_proto_database(database: &RegisteredDatabase) -> proto::DatabaseInfo {
    proto::DatabaseInfo {
        id: database.id.clone(),
        connection_string: database.connection_string.clone(),
        database_type: database.database_type.as_str().to_string(),
        name: database.name.clone(),
        host: database.host.clone(),
        port: database.port as u32,
        version: database.version.clone(),
        registered_at: Some(to_proto_timestamp(database.registered_at)),
        last_seen: database.last_seen.map(to_proto_timestamp),
        health_status: database.health_status.as_str().to_string(),
        health_score: database.health_score,
        enabled: database.enabled,
        metadata: database.metadata.clone(),
    }
}

/// Convert a wire database entry to the domain type.
pub fn from_proto_database(msg: proto::DatabaseInfo) -> RegisteredDatabase {
    let mut database = RegisteredDatabase::new(
        msg.id,
        msg.connection_string,
        DatabaseType::from_tag(&msg.database_type),
        msg.name,
    );
    if !msg.host.is_empty() {
        database.host = msg.host;
    }
    if msg.port != 0 {
        database.port = msg.port as u16;
    }
    database.version = msg.version;
    if let Some(ts) = msg.registered_at.as_ref() {
        database.registered_at = from_proto_timestamp(ts);
    }
    database.last_seen = optional_timestamp(msg.last_seen.as_ref());
    database.health_status =
        DatabaseHealth::from_tag(&msg.health_status).unwrap_or(DatabaseHealth::Healthy);
    database.health_score = if msg.health_score == 0.0 {
        1.0
    } else {
        msg.health_score
    };
    database.enabled = msg.enabled;
    database.metadata = msg.metadata;
    database
}

// ═══════════════════════════════════════════════════════════════════════════════
// System Config
// ═══════════════════════════════════════════════════════════════════════════════

/// Convert the system config to the wire message.
pub fn to_proto_config(config: &SystemConfig) -> proto::SystemConfig {
    let t = &config.thresholds;
    proto::SystemConfig {
        thresholds: Some(proto::Thresholds {
            connection_pool_ratio: t.connection_pool_ratio,
            sequential_scan_count: t.sequential_scan_count,
            sequential_scan_delta: t.sequential_scan_delta,
            p95_latency_ms: t.p95_latency_ms,
            cache_hit_ratio: t.cache_hit_ratio,
            bloat_ratio: t.bloat_ratio,
            long_running_query_secs: t.long_running_query_secs,
            idle_transaction_secs: t.idle_transaction_secs,
        }),
        execution_mode: config.execution_mode.as_str().to_string(),
        onboarding_complete: config.onboarding_complete,
        target_connection_string: config
            .target
            .as_ref()
            .map(|t| t.connection_string.clone())
            .unwrap_or_default(),
        target_database_type: config
            .target
            .as_ref()
            .map(|t| t.database_type.as_str().to_string())
            .unwrap_or_default(),
        target_database_name: config
            .target
            .as_ref()
            .map(|t| t.name.clone())
            .unwrap_or_default(),
    }
}

/// Convert a wire system config to the domain type.
pub fn from_proto_config(msg: proto::SystemConfig) -> SystemConfig {
    let thresholds = msg
        .thresholds
        .map(|t| Thresholds {
            connection_pool_ratio: t.connection_pool_ratio,
            sequential_scan_count: t.sequential_scan_count,
            sequential_scan_delta: t.sequential_scan_delta,
            p95_latency_ms: t.p95_latency_ms,
            cache_hit_ratio: t.cache_hit_ratio,
            bloat_ratio: t.bloat_ratio,
            long_running_query_secs: t.long_running_query_secs,
            idle_transaction_secs: t.idle_transaction_secs,
        })
        .unwrap_or_default();

    let target = (!msg.target_connection_string.is_empty()).then(|| TargetDatabase {
        connection_string: msg.target_connection_string,
        database_type: DatabaseType::from_tag(&msg.target_database_type),
        name: msg.target_database_name,
    });

    SystemConfig {
        thresholds,
        execution_mode: crate::contracts::ExecutionMode::from_tag(&msg.execution_mode)
            .unwrap_or_default(),
        onboarding_complete: msg.onboarding_complete,
        target,
    }
}
