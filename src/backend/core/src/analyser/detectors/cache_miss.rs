//! Cache starvation detection.
//!
//! Absolute severity cutoffs: below the configured ratio is informational,
//! below 0.85 a warning, below 0.70 critical. Only a critical miss rate is
//! worth an application-side cache side-car; the rest get a recommendation.

use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

const WARNING_CUTOFF: f64 = 0.85;
const CRITICAL_CUTOFF: f64 = 0.70;
const DEFAULT_CACHE_MB: u32 = 256;

pub struct CacheMissDetector {
    hit_ratio_threshold: f64,
}

impl CacheMissDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            hit_ratio_threshold: thresholds.cache_hit_ratio,
        }
    }
}

impl Detector for CacheMissDetector {
    fn name(&self) -> &'static str {
        "cache_miss_rate_high"
    }

    fn category(&self) -> Category {
        Category::Cache
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let hit_rate = snapshot.measurements.cache_hit_rate?;
        if hit_rate >= self.hit_ratio_threshold {
            return None;
        }

        let severity = if hit_rate < CRITICAL_CUTOFF {
            Severity::Critical
        } else if hit_rate < WARNING_CUTOFF {
            Severity::Warning
        } else {
            Severity::Info
        };

        let plan = if severity == Severity::Critical {
            ActionPlan::DeployCache {
                max_memory_mb: DEFAULT_CACHE_MB,
            }
        } else {
            ActionPlan::Recommendation {
                action_type: "cache_optimization_recommendation".to_string(),
                text: format!(
                    "Buffer cache hit rate is {:.0}%; consider increasing shared_buffers \
                     or adding an application-side cache",
                    hit_rate * 100.0
                ),
            }
        };

        let mut detection = Detection::new(
            self.name(),
            self.category(),
            severity,
            snapshot.database_id.clone(),
            plan,
        )
        .with_title(format!("Cache hit rate at {:.0}%", hit_rate * 100.0))
        .with_description(format!(
            "Buffer cache hit rate {:.3} is below the {:.2} threshold",
            hit_rate, self.hit_ratio_threshold
        ))
        .with_recommendation("Increase cache capacity or reduce the working set")
        .with_evidence("cache_hit_rate", format_metric(hit_rate))
        .with_evidence("threshold", format_metric(self.hit_ratio_threshold));

        if let Some(misses) = snapshot.measurements.cache_misses {
            detection = detection.with_evidence("cache_misses", misses);
        }

        Some(detection)
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.hit_ratio_threshold = thresholds.cache_hit_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::snapshot;
    use super::*;

    fn fixture(hit_rate: f64) -> Snapshot {
        let mut s = snapshot("db-1");
        s.measurements.cache_hit_rate = Some(hit_rate);
        s
    }

    #[test]
    fn test_info_at_085() {
        let detector = CacheMissDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(0.85)).unwrap();

        assert_eq!(d.severity, Severity::Info);
        assert_eq!(d.action_type(), "cache_optimization_recommendation");
        assert_eq!(d.key(), "db-1:cache_miss_rate_high:cache");
    }

    #[test]
    fn test_warning_below_085() {
        let detector = CacheMissDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(0.80)).unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.action_type(), "cache_optimization_recommendation");
    }

    #[test]
    fn test_critical_deploys_cache() {
        let detector = CacheMissDetector::new(&Thresholds::default());
        let d = detector.detect(&fixture(0.50)).unwrap();
        assert_eq!(d.severity, Severity::Critical);
        assert_eq!(d.action_type(), "deploy_cache");
    }

    #[test]
    fn test_healthy_rate_is_quiet() {
        let detector = CacheMissDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture(0.95)).is_none());
        assert!(detector.detect(&fixture(0.90)).is_none());
    }

    #[test]
    fn test_absent_rate_is_quiet() {
        let detector = CacheMissDetector::new(&Thresholds::default());
        assert!(detector.detect(&snapshot("db-1")).is_none());
    }
}
