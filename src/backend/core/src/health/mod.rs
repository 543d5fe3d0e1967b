//! Component health checks for the service binaries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus::EventBus;
use crate::knowledge::KnowledgeApi;

/// Health state of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The result of probing one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            error: None,
            latency_ms: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: None,
            error: None,
            latency_ms: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }
}

/// Probes one dependency.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> ComponentHealth;

    /// Probe under a timeout; an elapsed deadline reports unhealthy.
    async fn check_with_timeout(&self, timeout: Duration) -> ComponentHealth {
        let start = Instant::now();
        match tokio::time::timeout(timeout, self.check()).await {
            Ok(mut health) => {
                health.latency_ms = Some(start.elapsed().as_millis() as u64);
                health
            }
            Err(_) => ComponentHealth::unhealthy(self.name())
                .with_error(format!("Probe timed out after {:?}", timeout))
                .with_latency(start.elapsed()),
        }
    }
}

/// Probes the event bus by publishing on a drop-only subject.
pub struct BusHealthChecker {
    bus: Arc<dyn EventBus>,
}

impl BusHealthChecker {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl HealthChecker for BusHealthChecker {
    fn name(&self) -> &str {
        "event_bus"
    }

    async fn check(&self) -> ComponentHealth {
        match self.bus.publish("health.probe", b"{}").await {
            Ok(()) => ComponentHealth::healthy(self.name()).with_message("Publish ok"),
            Err(e) => ComponentHealth::unhealthy(self.name()).with_error(e.to_string()),
        }
    }
}

/// Probes Knowledge with a config read.
pub struct KnowledgeHealthChecker {
    knowledge: Arc<dyn KnowledgeApi>,
}

impl KnowledgeHealthChecker {
    pub fn new(knowledge: Arc<dyn KnowledgeApi>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl HealthChecker for KnowledgeHealthChecker {
    fn name(&self) -> &str {
        "knowledge"
    }

    async fn check(&self) -> ComponentHealth {
        match self.knowledge.get_system_config().await {
            Ok(_) => ComponentHealth::healthy(self.name()).with_message("Config read ok"),
            Err(e) => ComponentHealth::unhealthy(self.name()).with_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::knowledge::KnowledgeStore;

    #[tokio::test]
    async fn test_bus_checker_reports_healthy() {
        let checker = BusHealthChecker::new(Arc::new(MemoryBus::new()));
        let health = checker.check_with_timeout(Duration::from_secs(1)).await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_knowledge_checker_reports_healthy() {
        let checker = KnowledgeHealthChecker::new(Arc::new(KnowledgeStore::with_defaults()));
        let health = checker.check_with_timeout(Duration::from_secs(1)).await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_timeout_reports_unhealthy() {
        struct Slow;
        #[async_trait]
        impl HealthChecker for Slow {
            fn name(&self) -> &str {
                "slow"
            }
            async fn check(&self) -> ComponentHealth {
                tokio::time::sleep(Duration::from_secs(5)).await;
                ComponentHealth::healthy("slow")
            }
        }

        let health = Slow.check_with_timeout(Duration::from_millis(10)).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }
}
