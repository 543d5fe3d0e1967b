//! Detector registry.
//!
//! A detector inspects one snapshot and returns at most one detection. It
//! returns `None` when the measurements it needs are absent, when values sit
//! below threshold, or when required labels are missing to produce an
//! actionable detection. Detectors run in registration order.

mod cache_miss;
mod connection_pool;
mod high_latency;
mod idle_transaction;
mod long_running_query;
mod missing_index;
mod table_bloat;

pub use cache_miss::CacheMissDetector;
pub use connection_pool::ConnectionPoolDetector;
pub use high_latency::HighLatencyDetector;
pub use idle_transaction::IdleTransactionDetector;
pub use long_running_query::LongRunningQueryDetector;
pub use missing_index::MissingIndexDetector;
pub use table_bloat::TableBloatDetector;

use crate::contracts::{Category, Detection, Snapshot, Thresholds};

/// One pluggable anomaly detector.
pub trait Detector: Send + Sync {
    /// Stable identifier; part of every deduplication key this detector
    /// produces.
    fn name(&self) -> &'static str;

    /// The health dimension this detector covers.
    fn category(&self) -> Category;

    /// Inspect one snapshot.
    fn detect(&self, snapshot: &Snapshot) -> Option<Detection>;

    /// Apply runtime-tuned thresholds.
    fn set_thresholds(&mut self, thresholds: &Thresholds);
}

/// Ordered detector collection.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full detector set with the given thresholds.
    pub fn with_all(thresholds: &Thresholds) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MissingIndexDetector::new(thresholds)));
        registry.register(Box::new(HighLatencyDetector::new(thresholds)));
        registry.register(Box::new(CacheMissDetector::new(thresholds)));
        registry.register(Box::new(ConnectionPoolDetector::new(thresholds)));
        registry.register(Box::new(TableBloatDetector::new(thresholds)));
        registry.register(Box::new(LongRunningQueryDetector::new(thresholds)));
        registry.register(Box::new(IdleTransactionDetector::new(thresholds)));
        registry
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector against the snapshot, in registration order.
    pub fn detect_all(&self, snapshot: &Snapshot) -> Vec<Detection> {
        self.detectors
            .iter()
            .filter_map(|d| d.detect(snapshot))
            .collect()
    }

    /// Push new thresholds into every detector.
    pub fn apply_thresholds(&mut self, thresholds: &Thresholds) {
        for detector in &mut self.detectors {
            detector.set_thresholds(thresholds);
        }
    }
}

/// Render an evidence number without a trailing `.0` for whole values.
pub(crate) fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}
