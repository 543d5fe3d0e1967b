//! Verification tracker.
//!
//! After an action completes, its detection key enters a pending verification.
//! Each Analyser metric cycle advances every pending entry by one; an entry
//! that survives `required_cycles` without its detection re-firing resolves.
//! A re-fire after the grace period means the action did not work: the entry
//! is removed and a rollback is requested.
//!
//! The tracker owns only abstract observers. Callbacks are invoked strictly
//! after the internal lock is released, so an observer may re-enter the
//! tracker without deadlocking.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VerificationConfig;
use crate::observability::metrics;

/// Reason string carried by rollback requests born from a re-fire.
pub const REFIRE_REASON: &str = "Issue re-detected after action completion";

/// One pending verification.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub detection_key: String,
    pub detection_id: String,
    pub action_id: String,
    pub action_type: String,
    pub database_id: String,
    /// Wall time the action completed.
    pub completed_at: DateTime<Utc>,
    /// Analyser cycles elapsed since completion.
    pub elapsed_cycles: u32,
}

/// Observer for verifications that failed (the issue came back).
pub trait RollbackSink: Send + Sync {
    fn rollback_needed(&self, entry: &PendingVerification, reason: &str);
}

/// Observer for verifications that completed successfully.
pub trait ResolutionSink: Send + Sync {
    fn verified(&self, entry: &PendingVerification);
}

/// Process-wide verification state, keyed by detection key.
pub struct VerificationTracker {
    entries: Mutex<HashMap<String, PendingVerification>>,
    required_cycles: u32,
    grace_cycles: u32,
    max_wait: Duration,
    rollback: Arc<dyn RollbackSink>,
    resolution: Arc<dyn ResolutionSink>,
}

impl VerificationTracker {
    pub fn new(
        config: &VerificationConfig,
        rollback: Arc<dyn RollbackSink>,
        resolution: Arc<dyn ResolutionSink>,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            required_cycles: config.required_cycles.max(1),
            grace_cycles: config.grace_cycles,
            max_wait: config.max_wait,
            rollback,
            resolution,
        }
    }

    /// Start (or restart) verification for a detection key.
    ///
    /// Overwrites any existing entry under the same key and resets its cycle
    /// count.
    pub fn add(
        &self,
        detection_key: impl Into<String>,
        detection_id: impl Into<String>,
        action_id: impl Into<String>,
        action_type: impl Into<String>,
        database_id: impl Into<String>,
    ) {
        let entry = PendingVerification {
            detection_key: detection_key.into(),
            detection_id: detection_id.into(),
            action_id: action_id.into(),
            action_type: action_type.into(),
            database_id: database_id.into(),
            completed_at: Utc::now(),
            elapsed_cycles: 0,
        };

        let count = {
            let mut entries = self.entries.lock();
            entries.insert(entry.detection_key.clone(), entry.clone());
            entries.len()
        };

        debug!(key = %entry.detection_key, action_id = %entry.action_id, "Verification pending");
        metrics::set_pending_verifications(count as u64);
    }

    /// Called immediately before a candidate detection is published.
    ///
    /// Returns `true` when the detection must be suppressed because a
    /// verification is pending under its key. Within the grace period the
    /// re-fire is only suppressed; past it the action is judged failed, the
    /// entry removed, and the rollback observer notified.
    pub fn on_detection_fired(&self, key: &str) -> bool {
        let rollback_entry = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get(key) else {
                return false;
            };

            if entry.elapsed_cycles < self.grace_cycles {
                debug!(
                    key = %key,
                    cycles = entry.elapsed_cycles,
                    grace = self.grace_cycles,
                    "Re-fire within grace period; suppressed"
                );
                None
            } else {
                entries.remove(key)
            }
        };

        if let Some(entry) = rollback_entry {
            warn!(
                key = %key,
                action_id = %entry.action_id,
                "Verification failed; requesting rollback"
            );
            metrics::set_pending_verifications(self.pending_count() as u64);
            self.rollback.rollback_needed(&entry, REFIRE_REASON);
        }

        true
    }

    /// Called once after each metric snapshot has been fully processed.
    ///
    /// Advances every pending entry by one cycle; entries reaching the
    /// required count resolve, entries past the wall-clock ceiling are
    /// abandoned without rollback.
    pub fn on_collection_cycle(&self) {
        let now = Utc::now();
        let mut resolved = Vec::new();

        {
            let mut entries = self.entries.lock();
            entries.retain(|key, entry| {
                let waited = (now - entry.completed_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if waited > self.max_wait {
                    warn!(key = %key, waited_secs = waited.as_secs(), "Verification abandoned");
                    return false;
                }

                entry.elapsed_cycles += 1;
                if entry.elapsed_cycles >= self.required_cycles {
                    resolved.push(entry.clone());
                    return false;
                }
                true
            });
            metrics::set_pending_verifications(entries.len() as u64);
        }

        for entry in resolved {
            info!(
                key = %entry.detection_key,
                cycles = entry.elapsed_cycles,
                "Verification resolved"
            );
            self.resolution.verified(&entry);
        }
    }

    /// Whether a verification is pending for this key.
    pub fn is_pending(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of pending verifications.
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Snapshot of every pending entry.
    pub fn list(&self) -> Vec<PendingVerification> {
        self.entries.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct Recorder {
        rollbacks: PlMutex<Vec<(PendingVerification, String)>>,
        resolutions: PlMutex<Vec<PendingVerification>>,
    }

    impl RollbackSink for Recorder {
        fn rollback_needed(&self, entry: &PendingVerification, reason: &str) {
            self.rollbacks
                .lock()
                .push((entry.clone(), reason.to_string()));
        }
    }

    impl ResolutionSink for Recorder {
        fn verified(&self, entry: &PendingVerification) {
            self.resolutions.lock().push(entry.clone());
        }
    }

    fn tracker(
        required: u32,
        grace: u32,
        max_wait: Duration,
    ) -> (Arc<Recorder>, VerificationTracker) {
        let recorder = Arc::new(Recorder::default());
        let tracker = VerificationTracker::new(
            &VerificationConfig {
                required_cycles: required,
                grace_cycles: grace,
                max_wait,
            },
            recorder.clone(),
            recorder.clone(),
        );
        (recorder, tracker)
    }

    fn add(t: &VerificationTracker, key: &str) {
        t.add(key, "det-1", "action-1", "create_index", "db-1");
    }

    #[test]
    fn test_resolves_after_required_cycles() {
        let (recorder, tracker) = tracker(3, 1, Duration::from_secs(600));
        add(&tracker, "k");

        tracker.on_collection_cycle();
        tracker.on_collection_cycle();
        assert!(tracker.is_pending("k"));
        assert!(recorder.resolutions.lock().is_empty());

        tracker.on_collection_cycle();
        assert!(!tracker.is_pending("k"));

        let resolutions = recorder.resolutions.lock();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].detection_id, "det-1");
        assert_eq!(resolutions[0].elapsed_cycles, 3);
        assert!(recorder.rollbacks.lock().is_empty());
    }

    #[test]
    fn test_refire_within_grace_suppresses_without_rollback() {
        let (recorder, tracker) = tracker(3, 1, Duration::from_secs(600));
        add(&tracker, "k");

        // Zero cycles elapsed: inside the grace window.
        assert!(tracker.on_detection_fired("k"));
        assert!(tracker.is_pending("k"));
        assert!(recorder.rollbacks.lock().is_empty());
    }

    #[test]
    fn test_refire_after_grace_requests_rollback() {
        let (recorder, tracker) = tracker(3, 1, Duration::from_secs(600));
        add(&tracker, "k");

        tracker.on_collection_cycle();
        assert!(tracker.on_detection_fired("k"));
        assert!(!tracker.is_pending("k"));

        let rollbacks = recorder.rollbacks.lock();
        assert_eq!(rollbacks.len(), 1);
        assert_eq!(rollbacks[0].0.action_id, "action-1");
        assert_eq!(rollbacks[0].1, REFIRE_REASON);
        assert!(recorder.resolutions.lock().is_empty());
    }

    #[test]
    fn test_unknown_key_is_not_suppressed() {
        let (_, tracker) = tracker(3, 1, Duration::from_secs(600));
        assert!(!tracker.on_detection_fired("unknown"));
    }

    #[test]
    fn test_add_overwrites_and_resets_counter() {
        let (recorder, tracker) = tracker(3, 1, Duration::from_secs(600));
        add(&tracker, "k");
        tracker.on_collection_cycle();
        tracker.on_collection_cycle();

        // A second action completes under the same key: counter resets.
        tracker.add("k", "det-2", "action-2", "vacuum_table", "db-1");
        tracker.on_collection_cycle();
        assert!(tracker.is_pending("k"));

        tracker.on_collection_cycle();
        tracker.on_collection_cycle();
        let resolutions = recorder.resolutions.lock();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].detection_id, "det-2");
    }

    #[test]
    fn test_wall_clock_abandonment_skips_callbacks() {
        let (recorder, tracker) = tracker(100, 1, Duration::ZERO);
        add(&tracker, "k");

        std::thread::sleep(Duration::from_millis(5));
        tracker.on_collection_cycle();

        assert!(!tracker.is_pending("k"));
        assert!(recorder.rollbacks.lock().is_empty());
        assert!(recorder.resolutions.lock().is_empty());
    }

    #[test]
    fn test_exactly_one_resolution_per_entry() {
        let (recorder, tracker) = tracker(1, 0, Duration::from_secs(600));
        add(&tracker, "k");

        tracker.on_collection_cycle();
        tracker.on_collection_cycle();
        tracker.on_collection_cycle();

        assert_eq!(recorder.resolutions.lock().len(), 1);
    }

    #[test]
    fn test_reentrant_callback_does_not_deadlock() {
        struct Reentrant {
            tracker: PlMutex<Option<Arc<VerificationTracker>>>,
        }
        impl RollbackSink for Reentrant {
            fn rollback_needed(&self, _entry: &PendingVerification, _reason: &str) {
                if let Some(tracker) = self.tracker.lock().as_ref() {
                    // Observers may re-enter the tracker.
                    let _ = tracker.pending_count();
                }
            }
        }
        impl ResolutionSink for Reentrant {
            fn verified(&self, _entry: &PendingVerification) {
                if let Some(tracker) = self.tracker.lock().as_ref() {
                    let _ = tracker.pending_count();
                }
            }
        }

        let sink = Arc::new(Reentrant {
            tracker: PlMutex::new(None),
        });
        let tracker = Arc::new(VerificationTracker::new(
            &VerificationConfig {
                required_cycles: 1,
                grace_cycles: 0,
                max_wait: Duration::from_secs(600),
            },
            sink.clone(),
            sink.clone(),
        ));
        *sink.tracker.lock() = Some(tracker.clone());

        add(&tracker, "k");
        tracker.on_collection_cycle();

        add(&tracker, "k2");
        tracker.on_detection_fired("k2");
    }

    #[test]
    fn test_list_and_count() {
        let (_, tracker) = tracker(3, 1, Duration::from_secs(600));
        add(&tracker, "a");
        tracker.add("b", "det-2", "action-2", "vacuum_table", "db-2");

        assert_eq!(tracker.pending_count(), 2);
        let keys: Vec<String> = tracker
            .list()
            .into_iter()
            .map(|e| e.detection_key)
            .collect();
        assert!(keys.contains(&"a".to_string()));
        assert!(keys.contains(&"b".to_string()));
    }
}
