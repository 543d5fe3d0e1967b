//! Long-running query detection.
//!
//! Cutoffs: 60 s warning, 120 s critical. The backend pid label is required;
//! termination is always attempted gracefully first for active queries.

use crate::contracts::snapshot::keys;
use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

const WARNING_CUTOFF: f64 = 60.0;
const CRITICAL_CUTOFF: f64 = 120.0;

pub struct LongRunningQueryDetector {
    threshold_secs: f64,
}

impl LongRunningQueryDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            threshold_secs: thresholds.long_running_query_secs,
        }
    }
}

impl Detector for LongRunningQueryDetector {
    fn name(&self) -> &'static str {
        "long_running_query"
    }

    fn category(&self) -> Category {
        Category::Query
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let duration = snapshot.extended_metric(keys::LONGEST_QUERY_SECS)?;
        if duration <= self.threshold_secs {
            return None;
        }

        let pid: i64 = snapshot.label(keys::LONGEST_QUERY_PID)?.parse().ok()?;
        if pid <= 0 {
            return None;
        }

        let severity = if duration >= CRITICAL_CUTOFF {
            Severity::Critical
        } else if duration >= WARNING_CUTOFF {
            Severity::Warning
        } else {
            Severity::Info
        };

        let mut detection = Detection::new(
            self.name(),
            self.category(),
            severity,
            snapshot.database_id.clone(),
            ActionPlan::TerminateQuery {
                pid,
                graceful: true,
            },
        )
        .with_title(format!("Query running for {:.0} s", duration))
        .with_description(format!(
            "Backend {} has been executing the same query for {:.0} s",
            pid, duration
        ))
        .with_recommendation("Cancel the query; investigate the plan if it recurs")
        .with_evidence("pid", pid)
        .with_evidence("duration_secs", format_metric(duration));

        if let Some(query) = snapshot.label(keys::LONGEST_QUERY_TEXT) {
            detection = detection.with_evidence("query_text", query);
        }

        Some(detection)
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.threshold_secs = thresholds.long_running_query_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::snapshot;
    use super::*;

    fn fixture(secs: f64, pid: Option<&str>) -> Snapshot {
        let mut s = snapshot("db-1");
        s.extended.insert(keys::LONGEST_QUERY_SECS.to_string(), secs);
        if let Some(pid) = pid {
            s.labels
                .insert(keys::LONGEST_QUERY_PID.to_string(), pid.to_string());
        }
        s
    }

    #[test]
    fn test_severity_cutoffs() {
        let detector = LongRunningQueryDetector::new(&Thresholds::default());

        let d = detector.detect(&fixture(45.0, Some("4242"))).unwrap();
        assert_eq!(d.severity, Severity::Info);

        let d = detector.detect(&fixture(90.0, Some("4242"))).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = detector.detect(&fixture(180.0, Some("4242"))).unwrap();
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn test_terminates_gracefully() {
        let detector = LongRunningQueryDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(180.0, Some("4242"))).unwrap();
        assert_eq!(
            d.plan,
            ActionPlan::TerminateQuery {
                pid: 4242,
                graceful: true
            }
        );
    }

    #[test]
    fn test_requires_pid_label() {
        let detector = LongRunningQueryDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(180.0, None)).is_none());
        assert!(detector.detect(&fixture(180.0, Some("not-a-pid"))).is_none());
        assert!(detector.detect(&fixture(180.0, Some("0"))).is_none());
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let detector = LongRunningQueryDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(10.0, Some("4242"))).is_none());
        assert!(detector.detect(&snapshot("db-1")).is_none());
    }
}
