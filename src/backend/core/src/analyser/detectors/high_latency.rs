//! High query latency detection.

use crate::contracts::snapshot::keys;
use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

pub struct HighLatencyDetector {
    threshold_ms: f64,
}

impl HighLatencyDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            threshold_ms: thresholds.p95_latency_ms,
        }
    }

    fn severity(&self, latency_ms: f64) -> Severity {
        if latency_ms >= self.threshold_ms * 3.0 {
            Severity::Critical
        } else if latency_ms >= self.threshold_ms * 2.0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl Detector for HighLatencyDetector {
    fn name(&self) -> &'static str {
        "high_latency"
    }

    fn category(&self) -> Category {
        Category::Query
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let latency = snapshot.measurements.representative_latency_ms()?;
        if latency <= self.threshold_ms {
            return None;
        }

        let severity = self.severity(latency);
        let mut detection = Detection::new(
            self.name(),
            self.category(),
            severity,
            snapshot.database_id.clone(),
            ActionPlan::TuneConfigHighLatency,
        )
        .with_title(format!("Query latency at {:.0} ms", latency))
        .with_description(format!(
            "Average query latency {:.1} ms exceeds the {:.0} ms threshold",
            latency, self.threshold_ms
        ))
        .with_recommendation(
            "Tune memory and planner configuration for the current workload",
        )
        .with_evidence("latency_ms", format_metric(latency))
        .with_evidence("threshold_ms", format_metric(self.threshold_ms));

        if let Some(hash) = snapshot.label(keys::SLOWEST_QUERY_HASH) {
            detection = detection.with_evidence("query_hash", hash);
        }

        Some(detection)
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.threshold_ms = thresholds.p95_latency_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::snapshot;
    use super::*;

    fn fixture(avg_ms: Option<f64>, p95_ms: Option<f64>) -> Snapshot {
        let mut s = snapshot("db-1");
        s.measurements.avg_latency_ms = avg_ms;
        s.measurements.p95_latency_ms = p95_ms;
        s
    }

    #[test]
    fn test_severity_ladder() {
        let detector = HighLatencyDetector::new(&Thresholds::default());

        let d = detector.detect(&fixture(Some(150.0), None)).unwrap();
        assert_eq!(d.severity, Severity::Info);

        let d = detector.detect(&fixture(Some(200.0), None)).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = detector.detect(&fixture(Some(300.0), None)).unwrap();
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let detector = HighLatencyDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(Some(100.0), None)).is_none());
        assert!(detector.detect(&fixture(Some(40.0), None)).is_none());
    }

    #[test]
    fn test_absent_latency_is_quiet() {
        let detector = HighLatencyDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(None, None)).is_none());
    }

    #[test]
    fn test_p95_used_when_avg_absent() {
        let detector = HighLatencyDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(None, Some(250.0))).unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.action_type(), "tune_config_high_latency");
    }

    #[test]
    fn test_query_hash_feeds_the_key() {
        let detector = HighLatencyDetector::new(&Thresholds::default());
        let mut s = fixture(Some(150.0), None);
        s.labels.insert(
            keys::SLOWEST_QUERY_HASH.to_string(),
            "deadbeefcafe0123".to_string(),
        );

        let d = detector.detect(&s).unwrap();
        assert_eq!(d.key(), "db-1:high_latency:deadbeefcafe0123");
    }

    #[test]
    fn test_key_without_hash_uses_category() {
        let detector = HighLatencyDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(Some(150.0), None)).unwrap();
        assert_eq!(d.key(), "db-1:high_latency:query");
    }
}
