//! # Medic Core
//!
//! Autonomous database performance remediation control plane.
//!
//! ## Architecture
//!
//! - **Collector**: samples the managed database on an interval, normalises
//!   each sample, streams snapshots to the Analyser, fans them out on the bus
//! - **Analyser**: runs the detector registry, deduplicates findings, and
//!   drives the verification tracker that decides whether an action worked
//! - **Executor**: turns detections into idempotent, rollback-capable actions
//!   behind a capability-gated adapter layer and a bounded worker pool
//! - **Knowledge**: keyed hot-state store for detections, actions, registered
//!   databases, and system config; authoritative for lifecycles
//! - **Contracts**: the snapshot/detection/action schemas shared by all four
//! - **Bus**: Redis-backed fire-and-forget fanout with an in-memory twin

pub mod analyser;
pub mod api;
pub mod bus;
pub mod collector;
pub mod config;
pub mod contracts;
pub mod error;
pub mod executor;
pub mod health;
pub mod knowledge;
pub mod observability;

pub use error::{ErrorCode, ErrorSeverity, MedicError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analyser::{Analyser, DetectorRegistry, MetricsRpcService, VerificationTracker};
    pub use crate::bus::{EventBus, EventBusExt, MemoryBus, RedisEventBus};
    pub use crate::collector::{CollectorService, DatabaseAdapter, Normaliser};
    pub use crate::contracts::{
        ActionPlan, ActionRecord, ActionResult, ActionStatus, Capability, Detection,
        ExecutionMode, RawSample, RegisteredDatabase, Severity, Snapshot, SystemConfig,
        Thresholds,
    };
    pub use crate::error::{ErrorCode, MedicError, Result};
    pub use crate::executor::{Executor, ExecutorRpcService};
    pub use crate::knowledge::{GrpcKnowledge, KnowledgeApi, KnowledgeRpcService, KnowledgeStore};
}
