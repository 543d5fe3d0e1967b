//! Keyed hot-state store for detections, actions, databases, and config.
//!
//! The store holds no application logic beyond indexing and TTL: secondary
//! indexes are `active detections by database`, `pending actions by database`,
//! `actions by status`, and `detection key -> detection id`. Everything is
//! guarded per-collection; no lock is held across an await point.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::contracts::{
    ActionRecord, ActionStatus, DatabaseHealth, Detection, RegisteredDatabase, SystemConfig,
};
use crate::error::{ErrorCode, MedicError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Entries
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a stored detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionState {
    Active,
    Resolved,
}

/// A stored detection with its lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub detection: Detection,
    pub state: DetectionState,
    pub key: String,
    pub registered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set on resolution; the sweeper deletes the entry past this instant.
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub solution: String,
}

/// Counts reported by `system_status`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStatus {
    pub active_detections: u64,
    pub pending_actions: u64,
    pub registered_databases: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory hot-state store.
pub struct KnowledgeStore {
    detections: DashMap<String, DetectionEntry>,
    /// detection key -> detection id, active detections only.
    key_index: DashMap<String, String>,
    /// database id -> active detection ids.
    detections_by_db: DashMap<String, HashSet<String>>,

    actions: DashMap<String, ActionRecord>,
    /// status tag -> action ids.
    actions_by_status: DashMap<&'static str, HashSet<String>>,
    /// database id -> pending action ids.
    pending_by_db: DashMap<String, HashSet<String>>,

    databases: DashMap<String, RegisteredDatabase>,

    config: RwLock<Option<SystemConfig>>,

    resolved_ttl: Duration,
    action_retention: Duration,
}

impl KnowledgeStore {
    pub fn new(resolved_ttl: Duration, action_retention: Duration) -> Self {
        Self {
            detections: DashMap::new(),
            key_index: DashMap::new(),
            detections_by_db: DashMap::new(),
            actions: DashMap::new(),
            actions_by_status: DashMap::new(),
            pending_by_db: DashMap::new(),
            databases: DashMap::new(),
            config: RwLock::new(None),
            resolved_ttl,
            action_retention,
        }
    }

    /// Store with the default TTLs (resolved detections 300 s, actions 24 h).
    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(86_400))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detections
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a detection as active.
    ///
    /// Returns `false` without mutating anything when an active detection
    /// with the same key already exists.
    pub fn register_detection(&self, detection: Detection) -> bool {
        let key = detection.key();

        if self.is_detection_active(&key) {
            debug!(key = %key, "Duplicate detection suppressed");
            return false;
        }

        let id = detection.id.clone();
        let database_id = detection.database_id.clone();

        self.detections.insert(
            id.clone(),
            DetectionEntry {
                detection,
                state: DetectionState::Active,
                key: key.clone(),
                registered_at: Utc::now(),
                resolved_at: None,
                expires_at: None,
                solution: String::new(),
            },
        );
        self.key_index.insert(key, id.clone());
        self.detections_by_db
            .entry(database_id)
            .or_default()
            .insert(id);

        true
    }

    /// Whether an active detection exists under this key.
    pub fn is_detection_active(&self, key: &str) -> bool {
        match self.key_index.get(key) {
            Some(id) => self
                .detections
                .get(id.value())
                .map(|e| e.state == DetectionState::Active)
                .unwrap_or(false),
            None => false,
        }
    }

    /// All active detections for a database.
    pub fn active_detections_by_database(&self, database_id: &str) -> Vec<Detection> {
        let Some(ids) = self.detections_by_db.get(database_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.detections.get(id))
            .filter(|e| e.state == DetectionState::Active)
            .map(|e| e.detection.clone())
            .collect()
    }

    /// Look up a detection entry by id.
    pub fn get_detection(&self, detection_id: &str) -> Option<DetectionEntry> {
        self.detections.get(detection_id).map(|e| e.clone())
    }

    /// Mark a detection resolved, stamping a short TTL and dropping it from
    /// the active indexes.
    pub fn mark_detection_resolved(&self, detection_id: &str, solution: &str) -> Result<()> {
        let mut entry = self
            .detections
            .get_mut(detection_id)
            .ok_or_else(|| MedicError::not_found("detection", detection_id))?;

        let now = Utc::now();
        entry.state = DetectionState::Resolved;
        entry.resolved_at = Some(now);
        entry.expires_at =
            Some(now + ChronoDuration::from_std(self.resolved_ttl).unwrap_or_default());
        entry.solution = solution.to_string();

        let key = entry.key.clone();
        let database_id = entry.detection.database_id.clone();
        drop(entry);

        // Remove from the active indexes only if the key still points here;
        // a re-registration under the same key must not be clobbered.
        if let Some(current) = self.key_index.get(&key) {
            if current.value() == detection_id {
                drop(current);
                self.key_index.remove(&key);
            }
        }
        if let Some(mut ids) = self.detections_by_db.get_mut(&database_id) {
            ids.remove(detection_id);
        }

        info!(detection_id = %detection_id, "Detection resolved");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new action record.
    pub fn register_action(&self, record: ActionRecord) -> Result<()> {
        if self.actions.contains_key(&record.action_id) {
            return Err(MedicError::new(
                ErrorCode::DuplicateAction,
                format!("Action already registered: {}", record.action_id),
            ));
        }

        let id = record.action_id.clone();
        let database_id = record.database_id.clone();
        let status = record.status;

        self.actions_by_status
            .entry(status.as_str())
            .or_default()
            .insert(id.clone());
        if status.is_pending() {
            self.pending_by_db
                .entry(database_id)
                .or_default()
                .insert(id.clone());
        }
        self.actions.insert(id, record);
        Ok(())
    }

    /// Apply a status transition, maintaining both indexes and stamping
    /// timestamps as the record enters `executing` or a terminal state.
    pub fn update_action_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        message: &str,
        error: &str,
    ) -> Result<()> {
        let mut record = self
            .actions
            .get_mut(action_id)
            .ok_or_else(|| MedicError::action_not_found(action_id))?;

        let previous = record.status;
        if previous == status {
            // Idempotent repeat from a retried publish.
            return Ok(());
        }
        if !previous.can_transition_to(status) {
            return Err(MedicError::invalid_transition(
                previous.as_str(),
                status.as_str(),
            ));
        }

        record.apply_status(status, message, error);
        let database_id = record.database_id.clone();
        drop(record);

        if let Some(mut ids) = self.actions_by_status.get_mut(previous.as_str()) {
            ids.remove(action_id);
        }
        self.actions_by_status
            .entry(status.as_str())
            .or_default()
            .insert(action_id.to_string());

        if status.is_pending() {
            self.pending_by_db
                .entry(database_id)
                .or_default()
                .insert(action_id.to_string());
        } else if let Some(mut ids) = self.pending_by_db.get_mut(&database_id) {
            ids.remove(action_id);
        }

        Ok(())
    }

    /// Look up an action by id.
    pub fn get_action(&self, action_id: &str) -> Option<ActionRecord> {
        self.actions.get(action_id).map(|r| r.clone())
    }

    /// Pending (queued, awaiting approval, approved, executing) actions for a
    /// database; an empty id matches every database.
    pub fn pending_actions_by_database(&self, database_id: &str) -> Vec<ActionRecord> {
        let collect = |ids: &HashSet<String>| -> Vec<ActionRecord> {
            ids.iter()
                .filter_map(|id| self.actions.get(id))
                .filter(|r| r.status.is_pending())
                .map(|r| r.clone())
                .collect()
        };

        if database_id.is_empty() {
            return self
                .pending_by_db
                .iter()
                .flat_map(|ids| collect(ids.value()))
                .collect();
        }
        self.pending_by_db
            .get(database_id)
            .map(|ids| collect(ids.value()))
            .unwrap_or_default()
    }

    /// Actions currently in a given status.
    pub fn actions_by_status(&self, status: ActionStatus) -> Vec<ActionRecord> {
        self.actions_by_status
            .get(status.as_str())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.actions.get(id))
                    .map(|r| r.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Databases
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a database, assigning an id when none was supplied.
    /// Re-registration under an existing id updates the entry in place.
    pub fn register_database(&self, mut database: RegisteredDatabase) -> String {
        if database.id.is_empty() {
            database.id = format!("db-{}", Uuid::new_v4());
        }
        let id = database.id.clone();
        database.last_seen = Some(Utc::now());
        self.databases.insert(id.clone(), database);
        info!(database_id = %id, "Database registered");
        id
    }

    pub fn get_database(&self, database_id: &str) -> Option<RegisteredDatabase> {
        self.databases.get(database_id).map(|d| d.clone())
    }

    pub fn list_databases(&self, enabled_only: bool) -> Vec<RegisteredDatabase> {
        self.databases
            .iter()
            .filter(|d| !enabled_only || d.enabled)
            .map(|d| d.clone())
            .collect()
    }

    pub fn update_database(&self, database: RegisteredDatabase) -> Result<()> {
        if !self.databases.contains_key(&database.id) {
            return Err(MedicError::not_found("database", &database.id));
        }
        self.databases.insert(database.id.clone(), database);
        Ok(())
    }

    pub fn update_database_health(
        &self,
        database_id: &str,
        health: DatabaseHealth,
        score: f64,
    ) -> Result<()> {
        let mut database = self
            .databases
            .get_mut(database_id)
            .ok_or_else(|| MedicError::not_found("database", database_id))?;
        database.health_status = health;
        database.health_score = score;
        database.last_seen = Some(Utc::now());
        Ok(())
    }

    pub fn unregister_database(&self, database_id: &str) -> Result<()> {
        self.databases
            .remove(database_id)
            .map(|_| ())
            .ok_or_else(|| MedicError::not_found("database", database_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Config
    // ─────────────────────────────────────────────────────────────────────────

    /// The saved config, or a defaults skeleton when nothing was saved yet.
    pub fn system_config(&self) -> SystemConfig {
        self.config.read().clone().unwrap_or_default()
    }

    pub fn save_system_config(&self, config: SystemConfig) {
        *self.config.write() = Some(config);
    }

    /// Aggregate counts for the status RPC.
    pub fn system_status(&self) -> StoreStatus {
        StoreStatus {
            active_detections: self.key_index.len() as u64,
            pending_actions: self
                .pending_by_db
                .iter()
                .map(|ids| ids.len() as u64)
                .sum(),
            registered_databases: self.databases.len() as u64,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete resolved detections past their TTL and terminal actions past
    /// the retention window. Returns the number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;

        let expired: Vec<String> = self
            .detections
            .iter()
            .filter(|e| matches!(e.expires_at, Some(expiry) if expiry <= now))
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            self.detections.remove(&id);
            removed += 1;
        }

        let retention = ChronoDuration::from_std(self.action_retention).unwrap_or_default();
        let stale: Vec<(String, ActionStatus, String)> = self
            .actions
            .iter()
            .filter(|r| {
                r.status.is_terminal()
                    && matches!(r.completed_at, Some(done) if done + retention <= now)
            })
            .map(|r| (r.action_id.clone(), r.status, r.database_id.clone()))
            .collect();
        for (id, status, database_id) in stale {
            self.actions.remove(&id);
            if let Some(mut ids) = self.actions_by_status.get_mut(status.as_str()) {
                ids.remove(&id);
            }
            if let Some(mut ids) = self.pending_by_db.get_mut(&database_id) {
                ids.remove(&id);
            }
            removed += 1;
        }

        if removed > 0 {
            debug!(removed = removed, "Store sweep removed entries");
        }
        removed
    }

    /// Clear the whole store. Test/reset only.
    pub fn flush_all(&self) {
        self.detections.clear();
        self.key_index.clear();
        self.detections_by_db.clear();
        self.actions.clear();
        self.actions_by_status.clear();
        self.pending_by_db.clear();
        self.databases.clear();
        *self.config.write() = None;
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ActionPlan, Category, DatabaseType, IndexPriority, Severity};

    fn detection(database_id: &str) -> Detection {
        Detection::new(
            "missing_index",
            Category::Query,
            Severity::Warning,
            database_id,
            ActionPlan::CreateIndex {
                table_name: "users".to_string(),
                column_name: "email".to_string(),
                priority: IndexPriority::High,
            },
        )
    }

    #[test]
    fn test_register_detection_dedupes_by_key() {
        let store = KnowledgeStore::with_defaults();

        assert!(store.register_detection(detection("db-1")));
        assert!(!store.register_detection(detection("db-1")));
        assert!(store.is_detection_active("db-1:missing_index:users.email"));

        // Same detector against another database is a different key.
        assert!(store.register_detection(detection("db-2")));
    }

    #[test]
    fn test_mark_resolved_frees_the_key() {
        let store = KnowledgeStore::with_defaults();
        let d = detection("db-1");
        let id = d.id.clone();
        let key = d.key();

        store.register_detection(d);
        store.mark_detection_resolved(&id, "Created index").unwrap();

        assert!(!store.is_detection_active(&key));
        assert!(store.active_detections_by_database("db-1").is_empty());

        let entry = store.get_detection(&id).unwrap();
        assert_eq!(entry.state, DetectionState::Resolved);
        assert_eq!(entry.solution, "Created index");
        assert!(entry.expires_at.is_some());

        // The key is reusable immediately.
        assert!(store.register_detection(detection("db-1")));
    }

    #[test]
    fn test_resolve_does_not_clobber_reregistered_key() {
        let store = KnowledgeStore::with_defaults();
        let first = detection("db-1");
        let first_id = first.id.clone();
        let key = first.key();
        store.register_detection(first);

        // Resolve, then re-register under the same key.
        store.mark_detection_resolved(&first_id, "fixed").unwrap();
        let second = detection("db-1");
        store.register_detection(second);
        assert!(store.is_detection_active(&key));

        // Resolving the old id again must not drop the new active entry.
        let _ = store.mark_detection_resolved(&first_id, "fixed again");
        assert!(store.is_detection_active(&key));
    }

    #[test]
    fn test_action_status_index_follows_transitions() {
        let store = KnowledgeStore::with_defaults();
        let record = ActionRecord::new("action-1", "det-1", "create_index", "db-1");
        store.register_action(record).unwrap();

        assert_eq!(store.pending_actions_by_database("db-1").len(), 1);
        assert_eq!(store.actions_by_status(ActionStatus::Queued).len(), 1);

        store
            .update_action_status("action-1", ActionStatus::Executing, "working", "")
            .unwrap();
        assert_eq!(store.actions_by_status(ActionStatus::Queued).len(), 0);
        assert_eq!(store.actions_by_status(ActionStatus::Executing).len(), 1);
        assert_eq!(store.pending_actions_by_database("db-1").len(), 1);

        store
            .update_action_status("action-1", ActionStatus::Completed, "done", "")
            .unwrap();
        assert!(store.pending_actions_by_database("db-1").is_empty());

        let record = store.get_action("action-1").unwrap();
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let store = KnowledgeStore::with_defaults();
        store
            .register_action(ActionRecord::new("action-1", "det-1", "vacuum_table", "db-1"))
            .unwrap();

        let err = store
            .update_action_status("action-1", ActionStatus::Completed, "", "")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
    }

    #[test]
    fn test_repeated_status_update_is_idempotent() {
        let store = KnowledgeStore::with_defaults();
        store
            .register_action(ActionRecord::new("action-1", "det-1", "vacuum_table", "db-1"))
            .unwrap();
        store
            .update_action_status("action-1", ActionStatus::Executing, "", "")
            .unwrap();
        assert!(store
            .update_action_status("action-1", ActionStatus::Executing, "", "")
            .is_ok());
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let store = KnowledgeStore::with_defaults();
        store
            .register_action(ActionRecord::new("action-1", "det-1", "vacuum_table", "db-1"))
            .unwrap();
        let err = store
            .register_action(ActionRecord::new("action-1", "det-2", "vacuum_table", "db-1"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateAction);
    }

    #[test]
    fn test_database_lifecycle() {
        let store = KnowledgeStore::with_defaults();
        let db = RegisteredDatabase::new(
            "",
            "postgres://localhost:5432/app",
            DatabaseType::Postgres,
            "app",
        );
        let id = store.register_database(db);
        assert!(id.starts_with("db-"));

        store
            .update_database_health(&id, DatabaseHealth::Degraded, 0.4)
            .unwrap();
        let db = store.get_database(&id).unwrap();
        assert_eq!(db.health_status, DatabaseHealth::Degraded);

        assert_eq!(store.list_databases(true).len(), 1);
        store.unregister_database(&id).unwrap();
        assert!(store.list_databases(false).is_empty());
    }

    #[test]
    fn test_enabled_only_filter() {
        let store = KnowledgeStore::with_defaults();
        let mut db = RegisteredDatabase::new(
            "db-off",
            "postgres://localhost/app",
            DatabaseType::Postgres,
            "app",
        );
        db.enabled = false;
        store.register_database(db);

        assert_eq!(store.list_databases(false).len(), 1);
        assert!(store.list_databases(true).is_empty());
    }

    #[test]
    fn test_config_defaults_until_saved() {
        let store = KnowledgeStore::with_defaults();
        let config = store.system_config();
        assert!(!config.onboarding_complete);

        let mut saved = SystemConfig::default();
        saved.onboarding_complete = true;
        store.save_system_config(saved);
        assert!(store.system_config().onboarding_complete);
    }

    #[test]
    fn test_sweep_removes_expired_resolved_detections() {
        let store = KnowledgeStore::new(Duration::from_secs(300), Duration::from_secs(3600));
        let d = detection("db-1");
        let id = d.id.clone();
        store.register_detection(d);
        store.mark_detection_resolved(&id, "done").unwrap();

        // Not yet expired.
        assert_eq!(store.sweep(Utc::now()), 0);
        assert!(store.get_detection(&id).is_some());

        let later = Utc::now() + ChronoDuration::seconds(301);
        assert_eq!(store.sweep(later), 1);
        assert!(store.get_detection(&id).is_none());
    }

    #[test]
    fn test_sweep_prunes_old_terminal_actions() {
        let store = KnowledgeStore::new(Duration::from_secs(300), Duration::from_secs(60));
        store
            .register_action(ActionRecord::new("action-1", "det-1", "vacuum_table", "db-1"))
            .unwrap();
        store
            .update_action_status("action-1", ActionStatus::Executing, "", "")
            .unwrap();
        store
            .update_action_status("action-1", ActionStatus::Failed, "", "boom")
            .unwrap();

        assert_eq!(store.sweep(Utc::now()), 0);
        let later = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(store.sweep(later), 1);
        assert!(store.get_action("action-1").is_none());
    }

    #[test]
    fn test_flush_all() {
        let store = KnowledgeStore::with_defaults();
        store.register_detection(detection("db-1"));
        store
            .register_action(ActionRecord::new("action-1", "det-1", "vacuum_table", "db-1"))
            .unwrap();
        store.register_database(RegisteredDatabase::new(
            "db-1",
            "postgres://localhost/app",
            DatabaseType::Postgres,
            "app",
        ));

        store.flush_all();

        let status = store.system_status();
        assert_eq!(status.active_detections, 0);
        assert_eq!(status.pending_actions, 0);
        assert_eq!(status.registered_databases, 0);
    }
}
