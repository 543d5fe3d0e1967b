//! System configuration: detector thresholds, execution mode, onboarding.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::snapshot::DatabaseType;

/// Policy controlling whether detected issues are suggested, queued for
/// approval, or executed autonomously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Observe,
    Approval,
    Autonomous,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Approval => "approval",
            Self::Autonomous => "autonomous",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "observe" => Some(Self::Observe),
            "approval" => Some(Self::Approval),
            "autonomous" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Observe
    }
}

/// Per-detector trigger thresholds.
///
/// Values fetched from Knowledge override the compiled defaults only when
/// strictly greater than zero; zero therefore cannot be configured remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// connection_pool: active/max ratio that starts the ladder.
    pub connection_pool_ratio: f64,
    /// missing_index: cumulative sequential scan count.
    pub sequential_scan_count: i64,
    /// missing_index: per-cycle sequential scan delta, preferred when present.
    pub sequential_scan_delta: i64,
    /// high_latency: representative latency in milliseconds.
    pub p95_latency_ms: f64,
    /// cache_miss: hit rate below which the detector fires.
    pub cache_hit_ratio: f64,
    /// table_bloat: dead/(dead+live) ratio.
    pub bloat_ratio: f64,
    /// long_running_query: duration in seconds.
    pub long_running_query_secs: f64,
    /// idle_transaction: idle-in-transaction age in seconds.
    pub idle_transaction_secs: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            connection_pool_ratio: 0.80,
            sequential_scan_count: 100,
            sequential_scan_delta: 10,
            p95_latency_ms: 100.0,
            cache_hit_ratio: 0.90,
            bloat_ratio: 0.10,
            long_running_query_secs: 30.0,
            idle_transaction_secs: 300.0,
        }
    }
}

impl Thresholds {
    /// Overlay non-zero values from `other` onto `self`.
    pub fn merge_overrides(&mut self, other: &Thresholds) {
        if other.connection_pool_ratio > 0.0 {
            self.connection_pool_ratio = other.connection_pool_ratio;
        }
        if other.sequential_scan_count > 0 {
            self.sequential_scan_count = other.sequential_scan_count;
        }
        if other.sequential_scan_delta > 0 {
            self.sequential_scan_delta = other.sequential_scan_delta;
        }
        if other.p95_latency_ms > 0.0 {
            self.p95_latency_ms = other.p95_latency_ms;
        }
        if other.cache_hit_ratio > 0.0 {
            self.cache_hit_ratio = other.cache_hit_ratio;
        }
        if other.bloat_ratio > 0.0 {
            self.bloat_ratio = other.bloat_ratio;
        }
        if other.long_running_query_secs > 0.0 {
            self.long_running_query_secs = other.long_running_query_secs;
        }
        if other.idle_transaction_secs > 0.0 {
            self.idle_transaction_secs = other.idle_transaction_secs;
        }
    }
}

/// The database a fresh Collector should attach to, delivered through
/// Knowledge during onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDatabase {
    pub connection_string: String,
    pub database_type: DatabaseType,
    pub name: String,
}

/// System-wide configuration held by Knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub onboarding_complete: bool,
    pub target: Option<TargetDatabase>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            execution_mode: ExecutionMode::default(),
            onboarding_complete: false,
            target: None,
        }
    }
}
