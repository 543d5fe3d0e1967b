//! Executor: turns detections into remediation actions.
//!
//! Detections arrive over the bus, are deduplicated against pending work,
//! reified as typed actions, and executed under the configured execution mode
//! on a bounded worker pool. Status transitions are monotonic and each is
//! published before the next begins. Rollback serves both operator requests
//! (HTTP) and autonomous requests from the Analyser's verification tracker.

pub mod actions;
pub mod container;
pub mod db;
pub mod http;
pub mod pool;
mod service;

pub use container::{ContainerOrchestrator, ContainerSpec, DockerEngine, MemoryOrchestrator};
pub use db::{ActionAdapter, MemoryActionAdapter, PostgresActionAdapter, SlowQuery};
pub use pool::DispatchPool;
pub use service::ExecutorRpcService;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{
    decode, subjects, ActionCompletedEvent, ActionStatusEvent, ApprovalEvent, EventBus,
    EventBusExt, RollbackRequest,
};
use crate::config::ExecutorConfig;
use crate::contracts::{ActionRecord, ActionResult, ActionStatus, Detection, ExecutionMode};
use crate::error::{MedicError, Result};
use crate::knowledge::KnowledgeApi;
use crate::observability::{metrics, MedicEvent};

use actions::{build_action, Action, ActionContext};

/// How long an action may sit in `pending_approval` before it is rejected.
const APPROVAL_WAIT: Duration = Duration::from_secs(3_600);
/// Retry cadence when an approved action waits for pool capacity.
const APPROVED_RETRY: Duration = Duration::from_millis(500);

/// One dispatched action with everything its lifecycle needs.
pub struct ActionEntry {
    pub action: Arc<dyn Action>,
    pub detection: Detection,
    pub record: RwLock<ActionRecord>,
}

impl ActionEntry {
    pub fn record(&self) -> ActionRecord {
        self.record.read().clone()
    }
}

/// The Executor core, shared by the bus loop, the HTTP surface, and the gRPC
/// service.
pub struct Executor {
    config: ExecutorConfig,
    knowledge: Arc<dyn KnowledgeApi>,
    bus: Arc<dyn EventBus>,
    adapter: Arc<dyn ActionAdapter>,
    containers: Arc<dyn ContainerOrchestrator>,
    pool: DispatchPool,
    actions: DashMap<String, Arc<ActionEntry>>,
    approvals: DashMap<String, oneshot::Sender<bool>>,
    mode: RwLock<ExecutionMode>,
    connection_string: String,
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        knowledge: Arc<dyn KnowledgeApi>,
        bus: Arc<dyn EventBus>,
        adapter: Arc<dyn ActionAdapter>,
        containers: Arc<dyn ContainerOrchestrator>,
        connection_string: impl Into<String>,
    ) -> Self {
        let pool = DispatchPool::new(config.max_concurrent_actions, config.max_queued_actions);
        let mode = config.execution_mode;
        Self {
            config,
            knowledge,
            bus,
            adapter,
            containers,
            pool,
            actions: DashMap::new(),
            approvals: DashMap::new(),
            mode: RwLock::new(mode),
            connection_string: connection_string.into(),
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        *self.mode.read()
    }

    pub fn set_execution_mode(&self, mode: ExecutionMode) {
        *self.mode.write() = mode;
        info!(mode = %mode, "Execution mode set");
    }

    pub fn active_actions(&self) -> usize {
        self.pool.active()
    }

    pub fn queued_actions(&self) -> usize {
        self.pool.queued()
    }

    /// Look up a dispatched action's record.
    pub fn get_action(&self, action_id: &str) -> Option<ActionRecord> {
        self.actions.get(action_id).map(|entry| entry.record())
    }

    /// Pending records, optionally filtered by database.
    pub fn pending_actions(&self, database_id: &str) -> Vec<ActionRecord> {
        self.actions
            .iter()
            .map(|entry| entry.record())
            .filter(|record| record.status.is_pending())
            .filter(|record| database_id.is_empty() || record.database_id == database_id)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the bus loop until cancelled. The bus is a hard dependency: a
    /// failed subscription is fatal at startup.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        // Knowledge may carry an operator-set execution mode.
        match self.knowledge.get_system_config().await {
            Ok(config) if config.onboarding_complete => {
                self.set_execution_mode(config.execution_mode);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "System config unavailable; using configured mode"),
        }

        let mut detections = self.bus.subscribe(subjects::DETECTIONS).await?;
        let mut approvals = self.bus.subscribe(subjects::ACTIONS_APPROVE).await?;
        let mut rejections = self.bus.subscribe(subjects::ACTIONS_REJECT).await?;
        let mut rollbacks = self.bus.subscribe(subjects::ROLLBACK_REQUESTED).await?;

        info!(mode = %self.execution_mode(), "Executor listening for detections");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Executor shutting down");
                    return Ok(());
                }
                payload = detections.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    match decode::<Detection>(&payload) {
                        Ok(detection) => self.clone().handle_detection(detection).await,
                        Err(e) => warn!(error = %e, "Undecodable detection"),
                    }
                }
                payload = approvals.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    match decode::<ApprovalEvent>(&payload) {
                        Ok(event) => { self.resolve_approval(&event.action_id, true); }
                        Err(e) => warn!(error = %e, "Undecodable approval"),
                    }
                }
                payload = rejections.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    match decode::<ApprovalEvent>(&payload) {
                        Ok(event) => { self.resolve_approval(&event.action_id, false); }
                        Err(e) => warn!(error = %e, "Undecodable rejection"),
                    }
                }
                payload = rollbacks.recv() => {
                    let Some(payload) = payload else { return Ok(()) };
                    match decode::<RollbackRequest>(&payload) {
                        Ok(request) => {
                            if let Err(e) = self.rollback_action(&request.action_id, &request.reason).await {
                                warn!(
                                    action_id = %request.action_id,
                                    error = %e,
                                    "Autonomous rollback failed"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "Undecodable rollback request"),
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Dispatch one detection under the current execution mode.
    pub async fn handle_detection(self: Arc<Self>, detection: Detection) {
        // Duplicate pending work keyed by detection id is skipped.
        match self
            .knowledge
            .pending_actions_by_database(&detection.database_id)
            .await
        {
            Ok(pending) if pending.iter().any(|a| a.detection_id == detection.id) => {
                debug!(detection_id = %detection.id, "Pending action exists; skipped");
                return;
            }
            Err(e) => warn!(error = %e, "Pending-action lookup failed; dispatching anyway"),
            _ => {}
        }

        let action_id = next_action_id();
        let action: Arc<dyn Action> = Arc::from(build_action(&detection.plan));
        let record = ActionRecord::new(
            action_id.clone(),
            detection.id.clone(),
            detection.action_type().to_string(),
            detection.database_id.clone(),
        );
        let entry = Arc::new(ActionEntry {
            action,
            detection,
            record: RwLock::new(record),
        });

        let mode = self.execution_mode();
        match mode {
            ExecutionMode::Autonomous => {
                // Reserve capacity before anything is registered so a full
                // queue rejects the dispatch outright.
                let slot = match self.pool.try_reserve() {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!(action_id = %action_id, error = %e, "Dispatch rejected");
                        return;
                    }
                };

                self.register(&entry).await;
                let this = self.clone();
                let entry_for_task = entry.clone();
                slot.run(async move {
                    this.execute_entry(entry_for_task).await;
                });
            }
            ExecutionMode::Observe => {
                self.register(&entry).await;
                self.transition(
                    &entry,
                    ActionStatus::Suggested,
                    "Suggested only: executor is in observe mode",
                    "",
                )
                .await;
            }
            ExecutionMode::Approval => {
                self.register(&entry).await;
                self.transition(&entry, ActionStatus::PendingApproval, "Awaiting approval", "")
                    .await;

                let (tx, rx) = oneshot::channel();
                self.approvals.insert(action_id.clone(), tx);

                let this = self.clone();
                tokio::spawn(async move {
                    this.await_approval(entry, rx).await;
                });
            }
        }
    }

    /// Register the queued record with Knowledge, publish the first status,
    /// and remember the entry for the status surfaces.
    async fn register(&self, entry: &Arc<ActionEntry>) {
        let record = entry.record();
        if let Err(e) = self.knowledge.register_action(&record).await {
            warn!(error = %e, "Action registration failed");
        }
        self.actions
            .insert(record.action_id.clone(), entry.clone());

        MedicEvent::ActionQueued {
            action_id: record.action_id.clone(),
            action_type: record.action_type.clone(),
            database_id: record.database_id.clone(),
        }
        .log();
        self.publish_status(&record).await;
    }

    async fn await_approval(
        self: Arc<Self>,
        entry: Arc<ActionEntry>,
        rx: oneshot::Receiver<bool>,
    ) {
        let action_id = entry.record().action_id;
        let approved = matches!(
            tokio::time::timeout(APPROVAL_WAIT, rx).await,
            Ok(Ok(true))
        );
        self.approvals.remove(&action_id);

        if !approved {
            self.transition(
                &entry,
                ActionStatus::Rejected,
                "Rejected or approval window elapsed",
                "",
            )
            .await;
            return;
        }

        self.transition(&entry, ActionStatus::Approved, "Approved by operator", "")
            .await;

        // Approved work still honours the concurrency bound; it waits for a
        // slot instead of being rejected.
        let slot = loop {
            match self.pool.try_reserve() {
                Ok(slot) => break slot,
                Err(_) => tokio::time::sleep(APPROVED_RETRY).await,
            }
        };

        let this = self.clone();
        slot.run(async move {
            this.execute_entry(entry).await;
        });
    }

    /// Resolve a pending approval. Returns false when no action is waiting.
    pub fn resolve_approval(&self, action_id: &str, approve: bool) -> bool {
        match self.approvals.remove(action_id) {
            Some((_, tx)) => tx.send(approve).is_ok(),
            None => {
                debug!(action_id = %action_id, "No approval pending");
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    async fn execute_entry(&self, entry: Arc<ActionEntry>) {
        let record = entry.record();
        self.transition(&entry, ActionStatus::Executing, "", "").await;

        let ctx = ActionContext {
            action_id: record.action_id.clone(),
            detection: entry.detection.clone(),
            adapter: self.adapter.clone(),
            containers: self.containers.clone(),
            connection_string: self.connection_string.clone(),
        };

        let started = Instant::now();
        let result = match entry.action.validate(&ctx).await {
            Err(e) => ActionResult::failed(e.to_string()),
            Ok(()) => {
                match tokio::time::timeout(self.config.action_timeout, entry.action.execute(&ctx))
                    .await
                {
                    Err(_) => ActionResult::failed(format!(
                        "Action timed out after {:?}",
                        self.config.action_timeout
                    )),
                    Ok(Err(e)) => ActionResult::failed(e.to_string()),
                    Ok(Ok(result)) => result,
                }
            }
        };
        let elapsed = started.elapsed();

        {
            let mut record = entry.record.write();
            record.changes = result.changes.clone();
            record.can_rollback = result.can_rollback;
        }
        self.transition(&entry, result.status, &result.message, &result.error)
            .await;
        metrics::record_action_terminal(result.status.as_str(), elapsed.as_secs_f64());

        match result.status {
            ActionStatus::Completed => {
                MedicEvent::ActionCompleted {
                    action_id: record.action_id.clone(),
                    action_type: record.action_type.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                }
                .log();

                let solution = if result.solution.is_empty() {
                    result.message.clone()
                } else {
                    result.solution.clone()
                };
                let event = ActionCompletedEvent::new(
                    record.database_id.clone(),
                    record.action_id.clone(),
                    record.detection_id.clone(),
                    record.action_type.clone(),
                    entry.detection.key(),
                )
                .with_solution(solution)
                .with_rollback(result.can_rollback);

                if let Err(e) = self
                    .bus
                    .publish_json(subjects::ACTIONS_COMPLETED, &event)
                    .await
                {
                    warn!(error = %e, "Completion publish failed");
                    metrics::record_bus_publish_failure(subjects::ACTIONS_COMPLETED);
                }
            }
            ActionStatus::Failed => {
                MedicEvent::ActionFailed {
                    action_id: record.action_id.clone(),
                    action_type: record.action_type.clone(),
                    error: result.error.clone(),
                }
                .log();
            }
            _ => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rollback
    // ─────────────────────────────────────────────────────────────────────────

    /// Roll back a completed, rollback-capable action. Serves both the HTTP
    /// endpoint and autonomous rollback requests.
    pub async fn rollback_action(&self, action_id: &str, reason: &str) -> Result<ActionRecord> {
        let entry = self
            .actions
            .get(action_id)
            .map(|e| e.clone())
            .ok_or_else(|| MedicError::action_not_found(action_id))?;

        {
            let record = entry.record.read();
            if !record.rollback_allowed() {
                return Err(MedicError::rollback_not_allowed(
                    action_id,
                    &format!(
                        "status is {} and can_rollback is {}",
                        record.status, record.can_rollback
                    ),
                ));
            }
        }

        info!(action_id = %action_id, reason = %reason, "Rolling back action");

        let ctx = ActionContext {
            action_id: action_id.to_string(),
            detection: entry.detection.clone(),
            adapter: self.adapter.clone(),
            containers: self.containers.clone(),
            connection_string: self.connection_string.clone(),
        };

        let summary = tokio::time::timeout(self.config.action_timeout, entry.action.rollback(&ctx))
            .await
            .map_err(MedicError::from)
            .and_then(|inner| inner)?;

        let message = format!("{} ({})", summary, reason);
        self.transition(&entry, ActionStatus::RolledBack, &message, "")
            .await;
        metrics::record_action_terminal(ActionStatus::RolledBack.as_str(), 0.0);

        Ok(entry.record())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status Plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a status transition locally and in Knowledge, then publish it.
    /// Each transition is fully published before the caller proceeds.
    async fn transition(
        &self,
        entry: &Arc<ActionEntry>,
        status: ActionStatus,
        message: &str,
        error: &str,
    ) {
        {
            let mut record = entry.record.write();
            record.apply_status(status, message, error);
        }

        let record = entry.record();
        if let Err(e) = self
            .knowledge
            .update_action_status(&record.action_id, status, message, error)
            .await
        {
            warn!(action_id = %record.action_id, error = %e, "Status update failed");
        }
        self.publish_status(&record).await;
    }

    async fn publish_status(&self, record: &ActionRecord) {
        let event = ActionStatusEvent::new(
            record.database_id.clone(),
            record.action_id.clone(),
            record.detection_id.clone(),
            record.action_type.clone(),
            record.status,
        )
        .with_message(record.message.clone())
        .with_error(record.error.clone());

        if let Err(e) = self.bus.publish_json(subjects::ACTIONS_STATUS, &event).await {
            warn!(error = %e, "Status publish failed");
            metrics::record_bus_publish_failure(subjects::ACTIONS_STATUS);
        }
    }
}

/// Action ids are `action-<monotonic-nanoseconds>`.
fn next_action_id() -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1_000));
    format!("action-{}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_shape() {
        let id = next_action_id();
        assert!(id.starts_with("action-"));
        assert!(id["action-".len()..].parse::<i64>().is_ok());
    }

    #[test]
    fn test_action_ids_are_monotonic() {
        let a = next_action_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = next_action_id();
        assert!(b > a || b.len() > a.len());
    }
}
