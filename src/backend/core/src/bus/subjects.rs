//! Event-bus subject names.

/// Per-snapshot fanout (dashboard consumers; the Analyser stream is
/// authoritative).
pub const METRICS: &str = "metrics";

/// Each new detection, after deduplication.
pub const DETECTIONS: &str = "detections";

/// Every action status change.
pub const ACTIONS_STATUS: &str = "actions.status";

/// Terminal success, carrying the opaque solution string.
pub const ACTIONS_COMPLETED: &str = "actions.completed";

/// User approval in approval mode.
pub const ACTIONS_APPROVE: &str = "actions.approve";

/// User rejection in approval mode.
pub const ACTIONS_REJECT: &str = "actions.reject";

/// Rollback requests from the Analyser's verification tracker.
pub const ROLLBACK_REQUESTED: &str = "rollback.requested";
