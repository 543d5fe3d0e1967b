//! Action lifecycle records.
//!
//! An action is a reified remediation with its own persistent lifecycle.
//! Status transitions form a DAG; [`ActionStatus::can_transition_to`] is the
//! single authority every mutation path consults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    /// Observe mode: recorded for the operator, never executed.
    Suggested,
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    /// Acknowledged action type with no implementation in this build.
    PendingImplementation,
    RolledBack,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Suggested => "suggested",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PendingImplementation => "pending_implementation",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "queued" => Some(Self::Queued),
            "suggested" => Some(Self::Suggested),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "pending_implementation" => Some(Self::PendingImplementation),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Whether this status ends the normal execution path. Observe mode
    /// terminates at `suggested`; an operator may still revive it into the
    /// approval flow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Suggested
                | Self::Completed
                | Self::Failed
                | Self::PendingImplementation
                | Self::Rejected
                | Self::RolledBack
        )
    }

    /// Whether an action in this status counts as pending work.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::PendingApproval | Self::Approved | Self::Executing
        )
    }

    /// The transition DAG. `queued` fans out by execution mode; only
    /// `completed` may move to `rolled_back`.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Queued, Suggested)
                | (Queued, PendingApproval)
                | (Queued, Executing)
                | (Suggested, PendingApproval)
                | (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (Approved, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, PendingImplementation)
                | (Completed, RolledBack)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistent lifecycle entity for one remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub detection_id: String,
    pub action_type: String,
    pub database_id: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    /// Type-specific change descriptors captured by the action.
    #[serde(default)]
    pub changes: HashMap<String, String>,
    pub can_rollback: bool,
    pub rolled_back: bool,
}

impl ActionRecord {
    /// Create a record at `queued`, stamped now.
    pub fn new(
        action_id: impl Into<String>,
        detection_id: impl Into<String>,
        action_type: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            detection_id: detection_id.into(),
            action_type: action_type.into(),
            database_id: database_id.into(),
            status: ActionStatus::Queued,
            message: String::new(),
            error: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            changes: HashMap::new(),
            can_rollback: false,
            rolled_back: false,
        }
    }

    /// Apply a status transition, stamping started/completed timestamps as the
    /// action enters `executing` or a terminal state.
    pub fn apply_status(&mut self, status: ActionStatus, message: &str, error: &str) {
        self.status = status;
        if !message.is_empty() {
            self.message = message.to_string();
        }
        if !error.is_empty() {
            self.error = error.to_string();
        }

        let now = Utc::now();
        if status == ActionStatus::Executing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
            if let Some(started) = self.started_at {
                self.execution_time_ms = Some((now - started).num_milliseconds());
            }
        }
        if status == ActionStatus::RolledBack {
            self.rolled_back = true;
        }
    }

    /// Whether a rollback may be attempted on this record.
    pub fn rollback_allowed(&self) -> bool {
        self.status == ActionStatus::Completed && self.can_rollback && !self.rolled_back
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Result
// ═══════════════════════════════════════════════════════════════════════════════

/// The outcome of one action execution, produced by `Action::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub message: String,
    #[serde(default)]
    pub error: String,
    /// Opaque solution summary persisted on the resolved detection.
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub changes: HashMap<String, String>,
    pub can_rollback: bool,
}

impl ActionResult {
    /// A successful result.
    pub fn completed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: ActionStatus::Completed,
            solution: message.clone(),
            message,
            error: String::new(),
            changes: HashMap::new(),
            can_rollback: false,
        }
    }

    /// A failed result carrying the error text.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            message: String::new(),
            error: error.into(),
            solution: String::new(),
            changes: HashMap::new(),
            can_rollback: false,
        }
    }

    /// Acknowledged but not implemented in this build.
    pub fn pending_implementation(action_type: &str) -> Self {
        Self {
            status: ActionStatus::PendingImplementation,
            message: format!("Action type {} is not implemented yet", action_type),
            error: String::new(),
            solution: String::new(),
            changes: HashMap::new(),
            can_rollback: false,
        }
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = solution.into();
        self
    }

    pub fn with_change(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.changes.insert(key.into(), value.to_string());
        self
    }

    pub fn with_rollback(mut self) -> Self {
        self.can_rollback = true;
        self
    }
}
