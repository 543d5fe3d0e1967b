//! Typed payloads for the non-snapshot subjects.
//!
//! `metrics` carries [`crate::contracts::Snapshot`] and `detections` carries
//! [`crate::contracts::Detection`] directly; the action and rollback subjects
//! use the envelopes below. All payloads share `id`, `timestamp`,
//! `database_id` and tolerate unknown fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::ActionStatus;

/// Published on `actions.status` for every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStatusEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub database_id: String,
    pub action_id: String,
    pub detection_id: String,
    pub action_type: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: String,
}

impl ActionStatusEvent {
    pub fn new(
        database_id: impl Into<String>,
        action_id: impl Into<String>,
        detection_id: impl Into<String>,
        action_type: impl Into<String>,
        status: ActionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            database_id: database_id.into(),
            action_id: action_id.into(),
            detection_id: detection_id.into(),
            action_type: action_type.into(),
            status,
            message: String::new(),
            error: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

/// Published on `actions.completed` when an action reaches terminal success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCompletedEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub database_id: String,
    pub action_id: String,
    pub detection_id: String,
    pub action_type: String,
    /// Detection key, so the Analyser can start verification without a lookup.
    pub detection_key: String,
    /// Opaque solution summary; persisted verbatim on resolution.
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub can_rollback: bool,
}

impl ActionCompletedEvent {
    pub fn new(
        database_id: impl Into<String>,
        action_id: impl Into<String>,
        detection_id: impl Into<String>,
        action_type: impl Into<String>,
        detection_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            database_id: database_id.into(),
            action_id: action_id.into(),
            detection_id: detection_id.into(),
            action_type: action_type.into(),
            detection_key: detection_key.into(),
            solution: String::new(),
            can_rollback: false,
        }
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = solution.into();
        self
    }

    pub fn with_rollback(mut self, can_rollback: bool) -> Self {
        self.can_rollback = can_rollback;
        self
    }
}

/// Published on `actions.approve` / `actions.reject` in approval mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub database_id: String,
    pub action_id: String,
    /// Optional operator note.
    #[serde(default)]
    pub reason: String,
}

impl ApprovalEvent {
    pub fn new(action_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            database_id: String::new(),
            action_id: action_id.into(),
            reason: String::new(),
        }
    }
}

/// Published on `rollback.requested` when verification fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub database_id: String,
    pub action_id: String,
    pub detection_id: String,
    pub detection_key: String,
    pub action_type: String,
    pub reason: String,
}

impl RollbackRequest {
    pub fn new(
        database_id: impl Into<String>,
        action_id: impl Into<String>,
        detection_id: impl Into<String>,
        detection_key: impl Into<String>,
        action_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            database_id: database_id.into(),
            action_id: action_id.into(),
            detection_id: detection_id.into(),
            detection_key: detection_key.into(),
            action_type: action_type.into(),
            reason: reason.into(),
        }
    }
}
