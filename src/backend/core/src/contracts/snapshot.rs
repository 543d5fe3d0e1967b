//! Raw samples and normalised snapshots.
//!
//! A [`RawSample`] is what an adapter yields for one collection cycle; a
//! [`Snapshot`] is the adapter-agnostic view the Analyser consumes. All
//! structured fields are optional: absence means "not measured", and the
//! normaliser branches on presence, never on zero values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Well-known keys for adapter-specific labels and extended metrics.
///
/// Labels are produced by the postgres adapter and consumed by detectors;
/// the dotted naming survives the wire unchanged.
pub mod keys {
    /// Table with the highest sequential-scan count.
    pub const WORST_SEQ_SCAN_TABLE: &str = "pg.worst_seq_scan_table";
    /// Column recommended for an index on the worst seq-scan table.
    pub const RECOMMENDED_INDEX_COLUMN: &str = "pg.recommended_index_column";
    /// Table with the highest dead-tuple ratio.
    pub const WORST_BLOAT_TABLE: &str = "pg.worst_bloat_table";
    /// Backend pid of the longest-running query.
    pub const LONGEST_QUERY_PID: &str = "pg.longest_query_pid";
    /// Text of the longest-running query (truncated).
    pub const LONGEST_QUERY_TEXT: &str = "pg.longest_query_text";
    /// Backend pid of the oldest idle-in-transaction session.
    pub const IDLE_TXN_PID: &str = "pg.idle_txn_pid";
    /// Fingerprint of the slowest observed query.
    pub const SLOWEST_QUERY_HASH: &str = "pg.slowest_query_hash";

    /// Duration of the longest-running query, seconds (extended metric).
    pub const LONGEST_QUERY_SECS: &str = "pg.longest_query_secs";
    /// Age of the oldest idle-in-transaction session, seconds (extended metric).
    pub const IDLE_TXN_SECS: &str = "pg.idle_txn_secs";
    /// Dead-tuple ratio of the worst-bloated table (extended metric).
    pub const WORST_BLOAT_RATIO: &str = "pg.worst_bloat_ratio";

    /// Prefix for per-table extended metrics: `pg.table.<name>.<metric>`.
    pub const TABLE_PREFIX: &str = "pg.table.";
    /// Per-table live tuple count suffix.
    pub const LIVE_TUPLES_SUFFIX: &str = ".live_tuples";
    /// Per-table dead tuple count suffix.
    pub const DEAD_TUPLES_SUFFIX: &str = ".dead_tuples";
    /// Per-table sequential scan count suffix.
    pub const SEQ_SCANS_SUFFIX: &str = ".seq_scans";
}

/// Delta-map keys for the counters the normaliser tracks across cycles.
pub mod counters {
    pub const SEQUENTIAL_SCANS: &str = "sequential_scans";
    pub const SLOW_QUERIES: &str = "slow_queries";
    pub const CACHE_HITS: &str = "cache_hits";
    pub const CACHE_MISSES: &str = "cache_misses";
}

// ═══════════════════════════════════════════════════════════════════════════════
// Database Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Database engine tag used to pick adapters and normalisers.
///
/// Serialised as its plain tag string so unknown engines survive the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Postgres,
    /// Engine without a dedicated adapter; carried for forward compatibility.
    Other(String),
}

impl Serialize for DatabaseType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DatabaseType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

impl DatabaseType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Postgres => "postgres",
            Self::Other(tag) => tag.as_str(),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "postgres" | "postgresql" => Self::Postgres,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Raw Sample
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection statistics for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSample {
    pub active: Option<i64>,
    pub idle: Option<i64>,
    pub max: Option<i64>,
    pub waiting: Option<i64>,
}

/// Query latency and scan statistics for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySample {
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    /// Cumulative sequential scan counter across user tables.
    pub sequential_scans: Option<i64>,
    /// Cumulative slow-query counter.
    pub slow_queries: Option<i64>,
}

/// Storage statistics for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSample {
    pub used_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
}

/// Cache statistics for one cycle. `hit_rate` is `hits / (hits + misses)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSample {
    pub hit_rate: Option<f64>,
    pub hits: Option<i64>,
    pub misses: Option<i64>,
}

/// What an adapter yields for one collection cycle.
///
/// Sub-groups the adapter could not measure stay `None`; adapter-specific
/// numeric metrics go in `extended` under dotted keys and string facts in
/// `labels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    pub database_id: String,
    pub database_type: DatabaseType,
    pub collected_at: DateTime<Utc>,
    pub connections: Option<ConnectionSample>,
    pub queries: Option<QuerySample>,
    pub storage: Option<StorageSample>,
    pub cache: Option<CacheSample>,
    #[serde(default)]
    pub extended: HashMap<String, f64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl RawSample {
    /// Create an empty sample for a database at the given instant.
    pub fn new(
        database_id: impl Into<String>,
        database_type: DatabaseType,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            database_type,
            collected_at,
            connections: None,
            queries: None,
            storage: None,
            cache: None,
            extended: HashMap::new(),
            labels: HashMap::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Normalised Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Sub-scores in `[0, 1]`; `None` when the sample carried no underlying data,
/// in which case the dimension is excluded from the overall mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub connection: Option<f64>,
    pub query: Option<f64>,
    pub storage: Option<f64>,
    pub cache: Option<f64>,
}

impl SubScores {
    /// Arithmetic mean over present sub-scores; `1.0` when none are present.
    pub fn overall(&self) -> f64 {
        let present: Vec<f64> = [self.connection, self.query, self.storage, self.cache]
            .into_iter()
            .flatten()
            .collect();

        if present.is_empty() {
            1.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        }
    }
}

/// The optional scalar measurements of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub active_connections: Option<i64>,
    pub idle_connections: Option<i64>,
    pub max_connections: Option<i64>,
    pub waiting_connections: Option<i64>,
    pub p50_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub sequential_scans: Option<i64>,
    pub slow_queries: Option<i64>,
    pub storage_used_bytes: Option<i64>,
    pub storage_total_bytes: Option<i64>,
    pub cache_hit_rate: Option<f64>,
    pub cache_hits: Option<i64>,
    pub cache_misses: Option<i64>,
}

impl Measurements {
    /// `active / max` when both are present and `max > 0`.
    pub fn connection_utilisation(&self) -> Option<f64> {
        match (self.active_connections, self.max_connections) {
            (Some(active), Some(max)) if max > 0 => Some(active as f64 / max as f64),
            _ => None,
        }
    }

    /// The best available latency figure: avg preferred, then p95.
    pub fn representative_latency_ms(&self) -> Option<f64> {
        self.avg_latency_ms.or(self.p95_latency_ms)
    }
}

/// One normalised measurement of a database at a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub database_id: String,
    pub database_type: DatabaseType,
    pub collected_at: DateTime<Utc>,
    /// Mean over the sub-scores that had underlying data.
    pub overall_score: f64,
    pub scores: SubScores,
    pub measurements: Measurements,
    /// Positive per-counter deltas since the previous snapshot of the same
    /// database; empty on the first cycle or when time ran backwards.
    #[serde(default)]
    pub deltas: HashMap<String, f64>,
    /// Wall-clock seconds since the previous snapshot; `0.0` on the first.
    pub seconds_since_previous: f64,
    #[serde(default)]
    pub extended: HashMap<String, f64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Snapshot {
    /// Look up a label by key.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Look up an extended metric by key.
    pub fn extended_metric(&self, key: &str) -> Option<f64> {
        self.extended.get(key).copied()
    }

    /// Look up a counter delta by key.
    pub fn delta(&self, key: &str) -> Option<f64> {
        self.deltas.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_is_mean_of_present_scores() {
        let scores = SubScores {
            connection: Some(0.5),
            query: Some(1.0),
            storage: None,
            cache: None,
        };
        assert!((scores.overall() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overall_with_no_data_is_one() {
        assert_eq!(SubScores::default().overall(), 1.0);
    }

    #[test]
    fn test_overall_bounds() {
        let scores = SubScores {
            connection: Some(0.0),
            query: Some(0.0),
            storage: Some(0.0),
            cache: Some(0.0),
        };
        assert_eq!(scores.overall(), 0.0);

        let scores = SubScores {
            connection: Some(1.0),
            query: Some(1.0),
            storage: Some(1.0),
            cache: Some(1.0),
        };
        assert_eq!(scores.overall(), 1.0);
    }

    #[test]
    fn test_connection_utilisation_requires_positive_max() {
        let m = Measurements {
            active_connections: Some(10),
            max_connections: Some(0),
            ..Default::default()
        };
        assert_eq!(m.connection_utilisation(), None);

        let m = Measurements {
            active_connections: Some(80),
            max_connections: Some(100),
            ..Default::default()
        };
        assert!((m.connection_utilisation().unwrap() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_representative_latency_prefers_avg() {
        let m = Measurements {
            avg_latency_ms: Some(40.0),
            p95_latency_ms: Some(200.0),
            ..Default::default()
        };
        assert_eq!(m.representative_latency_ms(), Some(40.0));

        let m = Measurements {
            p95_latency_ms: Some(200.0),
            ..Default::default()
        };
        assert_eq!(m.representative_latency_ms(), Some(200.0));
    }

    #[test]
    fn test_database_type_round_trip() {
        assert_eq!(DatabaseType::from_tag("postgres"), DatabaseType::Postgres);
        assert_eq!(DatabaseType::from_tag("postgresql"), DatabaseType::Postgres);
        assert_eq!(
            DatabaseType::from_tag("cockroach"),
            DatabaseType::Other("cockroach".to_string())
        );
        assert_eq!(DatabaseType::Postgres.as_str(), "postgres");
    }

    #[test]
    fn test_snapshot_serde_ignores_unknown_fields() {
        let json = r#"{
            "database_id": "db-1",
            "database_type": "postgres",
            "collected_at": "2025-01-01T00:00:00Z",
            "overall_score": 0.9,
            "scores": {"connection": 0.9},
            "measurements": {},
            "seconds_since_previous": 0.0,
            "not_a_field": true
        }"#;

        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.database_id, "db-1");
        assert_eq!(snapshot.scores.connection, Some(0.9));
        assert!(snapshot.deltas.is_empty());
    }
}
