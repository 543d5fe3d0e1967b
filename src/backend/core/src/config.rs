//! Configuration management.
//!
//! Each service loads its own config section from the environment (prefix
//! `MEDIC`, separator `__`), optionally layered over a file. Durations accept
//! humantime strings (`"10s"`, `"5m"`). `validate()` enforces the fatal
//! startup rules; everything else has a default.

use serde::Deserialize;
use std::time::Duration;

use crate::contracts::ExecutionMode;
use crate::error::{MedicError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Shared Sections
// ═══════════════════════════════════════════════════════════════════════════════

/// Observability configuration shared by every binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

/// Verification tracker tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Analyser cycles without a re-fire before a verification resolves
    #[serde(default = "default_required_cycles")]
    pub required_cycles: u32,

    /// Cycles after completion during which a re-fire is suppressed without
    /// triggering rollback
    #[serde(default = "default_grace_cycles")]
    pub grace_cycles: u32,

    /// Hard wall-clock ceiling before a pending verification is abandoned
    #[serde(with = "humantime_serde", default = "default_max_wait")]
    pub max_wait: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            required_cycles: default_required_cycles(),
            grace_cycles: default_grace_cycles(),
            max_wait: default_max_wait(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Collector
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Analyser gRPC endpoint
    #[serde(default = "default_analyser_address")]
    pub analyser_address: String,

    /// Knowledge gRPC endpoint
    #[serde(default = "default_knowledge_address")]
    pub knowledge_address: String,

    /// Event bus URL (optional fanout; the Analyser stream is authoritative)
    #[serde(default = "default_bus_url")]
    pub event_bus_url: String,

    /// Sampling interval; also the per-collect ceiling
    #[serde(with = "humantime_serde", default = "default_collection_interval")]
    pub collection_interval: Duration,

    /// Stable id for the target database; generated when empty
    #[serde(default)]
    pub database_id: String,

    /// Display name for the target database
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Merge host-level metrics into each sample
    #[serde(default = "default_host_metrics")]
    pub host_metrics: bool,

    /// Timeout for outbound Knowledge / bus calls
    #[serde(with = "humantime_serde", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,

    /// Consecutive collect failures before sampling is suspended
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            analyser_address: default_analyser_address(),
            knowledge_address: default_knowledge_address(),
            event_bus_url: default_bus_url(),
            collection_interval: default_collection_interval(),
            database_id: String::new(),
            database_name: default_database_name(),
            host_metrics: default_host_metrics(),
            rpc_timeout: default_rpc_timeout(),
            breaker_threshold: default_breaker_threshold(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl CollectorConfig {
    /// Load from environment with the `MEDIC_COLLECTOR` prefix.
    pub fn load() -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("MEDIC_COLLECTOR").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file layered under the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MEDIC_COLLECTOR").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection_interval < Duration::from_secs(1) {
            return Err(MedicError::configuration(
                "collection_interval must be at least 1s",
            ));
        }
        if self.analyser_address.is_empty() {
            return Err(MedicError::configuration("analyser_address is required"));
        }
        if self.knowledge_address.is_empty() {
            return Err(MedicError::configuration("knowledge_address is required"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Analyser
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyserConfig {
    /// Port for the MetricsService gRPC server
    #[serde(default = "default_analyser_grpc_port")]
    pub grpc_port: u16,

    /// Knowledge gRPC endpoint
    #[serde(default = "default_knowledge_address")]
    pub knowledge_address: String,

    /// Event bus URL
    #[serde(default = "default_bus_url")]
    pub event_bus_url: String,

    /// Register the full detector set; individual thresholds still apply
    #[serde(default = "default_enable_all_detectors")]
    pub enable_all_detectors: bool,

    /// Compiled threshold defaults; Knowledge values overlay non-zero fields
    #[serde(default)]
    pub thresholds: crate::contracts::Thresholds,

    #[serde(default)]
    pub verification: VerificationConfig,

    /// Timeout for outbound Knowledge / bus calls
    #[serde(with = "humantime_serde", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            grpc_port: default_analyser_grpc_port(),
            knowledge_address: default_knowledge_address(),
            event_bus_url: default_bus_url(),
            enable_all_detectors: default_enable_all_detectors(),
            thresholds: Default::default(),
            verification: VerificationConfig::default(),
            rpc_timeout: default_rpc_timeout(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AnalyserConfig {
    pub fn load() -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("MEDIC_ANALYSER").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MEDIC_ANALYSER").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.knowledge_address.is_empty() {
            return Err(MedicError::configuration("knowledge_address is required"));
        }
        if self.verification.required_cycles == 0 {
            return Err(MedicError::configuration(
                "verification.required_cycles must be at least 1",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Executor
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Port for the ExecutorService gRPC server
    #[serde(default = "default_executor_grpc_port")]
    pub grpc_port: u16,

    /// Port for the REST surface (rollback, approvals, health)
    #[serde(default = "default_executor_http_port")]
    pub http_port: u16,

    /// Event bus URL; the Executor is non-functional without it
    #[serde(default = "default_bus_url")]
    pub event_bus_url: String,

    /// Knowledge gRPC endpoint
    #[serde(default = "default_knowledge_address")]
    pub knowledge_address: String,

    /// Worker pool size for concurrent action execution
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,

    /// Dispatches queued beyond the pool before `queue_full` rejections
    #[serde(default = "default_max_queued_actions")]
    pub max_queued_actions: usize,

    /// Per-action execution deadline
    #[serde(with = "humantime_serde", default = "default_action_timeout")]
    pub action_timeout: Duration,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Container runtime endpoint for side-car deployments
    #[serde(default = "default_container_runtime")]
    pub container_runtime_url: String,

    /// Timeout for outbound Knowledge / bus calls
    #[serde(with = "humantime_serde", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            grpc_port: default_executor_grpc_port(),
            http_port: default_executor_http_port(),
            event_bus_url: default_bus_url(),
            knowledge_address: default_knowledge_address(),
            max_concurrent_actions: default_max_concurrent_actions(),
            max_queued_actions: default_max_queued_actions(),
            action_timeout: default_action_timeout(),
            execution_mode: ExecutionMode::default(),
            container_runtime_url: default_container_runtime(),
            rpc_timeout: default_rpc_timeout(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn load() -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("MEDIC_EXECUTOR").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MEDIC_EXECUTOR").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_bus_url.is_empty() {
            return Err(MedicError::configuration(
                "event_bus_url is required: the executor receives work over the bus",
            ));
        }
        if self.max_concurrent_actions == 0 {
            return Err(MedicError::configuration(
                "max_concurrent_actions must be at least 1",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Knowledge
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    /// Bind host for the gRPC server
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Port for the KnowledgeService gRPC server
    #[serde(default = "default_knowledge_grpc_port")]
    pub grpc_port: u16,

    /// How long resolved detections are kept before deletion
    #[serde(with = "humantime_serde", default = "default_resolved_ttl")]
    pub resolved_detection_ttl: Duration,

    /// How long terminal actions are kept
    #[serde(with = "humantime_serde", default = "default_action_retention")]
    pub action_retention: Duration,

    /// Sweep interval for the TTL scavenger
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            grpc_port: default_knowledge_grpc_port(),
            resolved_detection_ttl: default_resolved_ttl(),
            action_retention: default_action_retention(),
            sweep_interval: default_sweep_interval(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl KnowledgeConfig {
    pub fn load() -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("MEDIC_KNOWLEDGE").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let cfg: Self = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MEDIC_KNOWLEDGE").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_host.is_empty() {
            return Err(MedicError::configuration("bind_host is required"));
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_required_cycles() -> u32 { 3 }
fn default_grace_cycles() -> u32 { 1 }
fn default_max_wait() -> Duration { Duration::from_secs(600) }
fn default_analyser_address() -> String { "http://127.0.0.1:50052".to_string() }
fn default_knowledge_address() -> String { "http://127.0.0.1:50051".to_string() }
fn default_bus_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_collection_interval() -> Duration { Duration::from_secs(10) }
fn default_database_name() -> String { "primary".to_string() }
fn default_host_metrics() -> bool { true }
fn default_rpc_timeout() -> Duration { Duration::from_secs(5) }
fn default_breaker_threshold() -> u32 { 3 }
fn default_analyser_grpc_port() -> u16 { 50052 }
fn default_enable_all_detectors() -> bool { true }
fn default_executor_grpc_port() -> u16 { 50053 }
fn default_executor_http_port() -> u16 { 8081 }
fn default_max_concurrent_actions() -> usize { 4 }
fn default_max_queued_actions() -> usize { 16 }
fn default_action_timeout() -> Duration { Duration::from_secs(300) }
fn default_container_runtime() -> String { "http://127.0.0.1:2375".to_string() }
fn default_bind_host() -> String { "0.0.0.0".to_string() }
fn default_knowledge_grpc_port() -> u16 { 50051 }
fn default_resolved_ttl() -> Duration { Duration::from_secs(300) }
fn default_action_retention() -> Duration { Duration::from_secs(86_400) }
fn default_sweep_interval() -> Duration { Duration::from_secs(30) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_defaults_validate() {
        let cfg = CollectorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.collection_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_collector_rejects_subsecond_interval() {
        let cfg = CollectorConfig {
            collection_interval: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_executor_requires_bus() {
        let cfg = ExecutorConfig {
            event_bus_url: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_executor_rejects_zero_workers() {
        let cfg = ExecutorConfig {
            max_concurrent_actions: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_verification_defaults() {
        let v = VerificationConfig::default();
        assert_eq!(v.required_cycles, 3);
        assert_eq!(v.grace_cycles, 1);
        assert_eq!(v.max_wait, Duration::from_secs(600));
    }

    #[test]
    fn test_knowledge_defaults() {
        let cfg = KnowledgeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.resolved_detection_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_from_file_layers_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        std::fs::write(
            &path,
            r#"
            analyser_address = "http://analyser.internal:50052"
            collection_interval = "30s"
            database_name = "orders-primary"
            "#,
        )
        .unwrap();

        let cfg = CollectorConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.analyser_address, "http://analyser.internal:50052");
        assert_eq!(cfg.collection_interval, Duration::from_secs(30));
        assert_eq!(cfg.database_name, "orders-primary");
        // Untouched knobs keep their defaults.
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_file_interval_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.toml");
        std::fs::write(&path, "collection_interval = \"100ms\"\n").unwrap();

        assert!(CollectorConfig::from_file(path.to_str().unwrap()).is_err());
    }
}
