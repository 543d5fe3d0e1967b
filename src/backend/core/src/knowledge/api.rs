//! The cross-service Knowledge surface.
//!
//! Collector, Analyser, and Executor depend on this trait rather than on a
//! transport: production wiring uses the gRPC client wrapper, tests and
//! single-process deployments use the in-process [`KnowledgeStore`].

use async_trait::async_trait;

use super::store::KnowledgeStore;
use crate::contracts::{
    ActionRecord, ActionStatus, DatabaseHealth, Detection, RegisteredDatabase, SystemConfig,
};
use crate::error::Result;

/// The subset of Knowledge operations other services call.
#[async_trait]
pub trait KnowledgeApi: Send + Sync {
    /// Register a detection; `Ok(false)` means an active detection with the
    /// same key already existed and this one was suppressed.
    async fn register_detection(&self, detection: &Detection) -> Result<bool>;

    /// Whether an active detection exists under this key.
    async fn is_detection_active(&self, key: &str) -> Result<bool>;

    /// Transition a detection to resolved, persisting the solution verbatim.
    async fn mark_detection_resolved(&self, detection_id: &str, solution: &str) -> Result<()>;

    /// Register a new action record.
    async fn register_action(&self, record: &ActionRecord) -> Result<()>;

    /// Apply an action status transition.
    async fn update_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        message: &str,
        error: &str,
    ) -> Result<()>;

    /// Pending actions for a database; an empty id matches every database.
    async fn pending_actions_by_database(&self, database_id: &str) -> Result<Vec<ActionRecord>>;

    /// Register a database; returns the assigned id.
    async fn register_database(&self, database: &RegisteredDatabase) -> Result<String>;

    /// Report a health observation for a database.
    async fn update_database_health(
        &self,
        database_id: &str,
        health: DatabaseHealth,
        score: f64,
    ) -> Result<()>;

    /// The saved system config, or a defaults skeleton.
    async fn get_system_config(&self) -> Result<SystemConfig>;

    /// Overwrite the system config.
    async fn save_system_config(&self, config: &SystemConfig) -> Result<()>;
}

#[async_trait]
impl KnowledgeApi for KnowledgeStore {
    async fn register_detection(&self, detection: &Detection) -> Result<bool> {
        Ok(KnowledgeStore::register_detection(self, detection.clone()))
    }

    async fn is_detection_active(&self, key: &str) -> Result<bool> {
        Ok(KnowledgeStore::is_detection_active(self, key))
    }

    async fn mark_detection_resolved(&self, detection_id: &str, solution: &str) -> Result<()> {
        KnowledgeStore::mark_detection_resolved(self, detection_id, solution)
    }

    async fn register_action(&self, record: &ActionRecord) -> Result<()> {
        KnowledgeStore::register_action(self, record.clone())
    }

    async fn update_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        message: &str,
        error: &str,
    ) -> Result<()> {
        KnowledgeStore::update_action_status(self, action_id, status, message, error)
    }

    async fn pending_actions_by_database(&self, database_id: &str) -> Result<Vec<ActionRecord>> {
        Ok(KnowledgeStore::pending_actions_by_database(
            self,
            database_id,
        ))
    }

    async fn register_database(&self, database: &RegisteredDatabase) -> Result<String> {
        Ok(KnowledgeStore::register_database(self, database.clone()))
    }

    async fn update_database_health(
        &self,
        database_id: &str,
        health: DatabaseHealth,
        score: f64,
    ) -> Result<()> {
        KnowledgeStore::update_database_health(self, database_id, health, score)
    }

    async fn get_system_config(&self) -> Result<SystemConfig> {
        Ok(KnowledgeStore::system_config(self))
    }

    async fn save_system_config(&self, config: &SystemConfig) -> Result<()> {
        KnowledgeStore::save_system_config(self, config.clone());
        Ok(())
    }
}
