//! Connection pool saturation detection.
//!
//! Ratio-based ladder with absolute cutoffs: 0.85 for warning, 0.95 for
//! critical. Critical saturation asks for a side-car connection pooler;
//! anything milder is a recommendation.

use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

const WARNING_CUTOFF: f64 = 0.85;
const CRITICAL_CUTOFF: f64 = 0.95;

pub struct ConnectionPoolDetector {
    ratio_threshold: f64,
}

impl ConnectionPoolDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            ratio_threshold: thresholds.connection_pool_ratio,
        }
    }
}

impl Detector for ConnectionPoolDetector {
    fn name(&self) -> &'static str {
        "connection_pool_saturation"
    }

    fn category(&self) -> Category {
        Category::Connection
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let ratio = snapshot.measurements.connection_utilisation()?;
        if ratio < self.ratio_threshold {
            return None;
        }

        let active = snapshot.measurements.active_connections.unwrap_or(0);
        let max = snapshot.measurements.max_connections.unwrap_or(0);

        let severity = if ratio >= CRITICAL_CUTOFF {
            Severity::Critical
        } else if ratio >= WARNING_CUTOFF {
            Severity::Warning
        } else {
            Severity::Info
        };

        let plan = if severity == Severity::Critical {
            ActionPlan::DeployConnectionPooler {
                max_client_connections: ((max as u32) * 2).max(100),
            }
        } else {
            ActionPlan::Recommendation {
                action_type: "connection_pool_recommendation".to_string(),
                text: format!(
                    "{} of {} connection slots in use; consider pooling client connections",
                    active, max
                ),
            }
        };

        Some(
            Detection::new(
                self.name(),
                self.category(),
                severity,
                snapshot.database_id.clone(),
                plan,
            )
            .with_title(format!(
                "Connection pool at {:.0}% capacity",
                ratio * 100.0
            ))
            .with_description(format!(
                "{} of {} connection slots in use (ratio {:.2})",
                active, max, ratio
            ))
            .with_recommendation("Pool client connections in front of the database")
            .with_evidence("active_connections", active)
            .with_evidence("max_connections", max)
            .with_evidence("utilisation", format_metric(ratio)),
        )
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.ratio_threshold = thresholds.connection_pool_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::snapshot;
    use super::*;

    fn fixture(active: i64, max: i64) -> Snapshot {
        let mut s = snapshot("db-1");
        s.measurements.active_connections = Some(active);
        s.measurements.max_connections = Some(max);
        s
    }

    #[test]
    fn test_critical_saturation_deploys_pooler() {
        let detector = ConnectionPoolDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(99, 100)).unwrap();

        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(d.action_type(), "deploy_connection_pooler");
        assert!(matches!(
            d.plan,
            ActionPlan::DeployConnectionPooler {
                max_client_connections: 200
            }
        ));
    }

    #[test]
    fn test_warning_band_recommends() {
        let detector = ConnectionPoolDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(90, 100)).unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.action_type(), "connection_pool_recommendation");
    }

    #[test]
    fn test_info_at_threshold() {
        let detector = ConnectionPoolDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(80, 100)).unwrap();
        assert_eq!(d.severity, Severity::Info);
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let detector = ConnectionPoolDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(50, 100)).is_none());
    }

    #[test]
    fn test_missing_measurements_are_quiet() {
        let detector = ConnectionPoolDetector::new(&Thresholds::default());
        let mut s = snapshot("db-1");
        s.measurements.active_connections = Some(99);
        assert!(detector.detect(&s).is_none());
    }
}
