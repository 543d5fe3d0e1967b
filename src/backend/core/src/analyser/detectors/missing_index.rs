//! Missing index detection.
//!
//! Fires when sequential scans are accumulating against a known worst-offender
//! table. The per-cycle delta is preferred over the cumulative count when the
//! normaliser could compute one; a recommended column label is required to
//! make the detection actionable.

use crate::contracts::snapshot::{counters, keys};
use crate::contracts::{
    ActionPlan, Category, Detection, IndexPriority, Severity, Snapshot, Thresholds,
};

use super::{format_metric, Detector};

pub struct MissingIndexDetector {
    count_threshold: i64,
    delta_threshold: i64,
}

impl MissingIndexDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            count_threshold: thresholds.sequential_scan_count,
            delta_threshold: thresholds.sequential_scan_delta,
        }
    }
}

impl Detector for MissingIndexDetector {
    fn name(&self) -> &'static str {
        "missing_index"
    }

    fn category(&self) -> Category {
        Category::Query
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let scans = snapshot.measurements.sequential_scans.filter(|s| *s > 0)?;
        let delta = snapshot.delta(counters::SEQUENTIAL_SCANS);

        // Prefer the delta: a table scanned heavily in the past but quiet now
        // does not need an index today.
        let triggered = match delta {
            Some(delta) => delta >= self.delta_threshold as f64,
            None => scans >= self.count_threshold,
        };
        if !triggered {
            return None;
        }

        let table = snapshot.label(keys::WORST_SEQ_SCAN_TABLE)?.to_string();
        let column = snapshot.label(keys::RECOMMENDED_INDEX_COLUMN)?.to_string();

        let priority = if delta.is_some() {
            IndexPriority::High
        } else {
            IndexPriority::Medium
        };

        let mut detection = Detection::new(
            self.name(),
            self.category(),
            Severity::Warning,
            snapshot.database_id.clone(),
            ActionPlan::CreateIndex {
                table_name: table.clone(),
                column_name: column.clone(),
                priority,
            },
        )
        .with_title(format!("Missing index on {}.{}", table, column))
        .with_description(format!(
            "Table {} is being sequentially scanned ({} cumulative scans)",
            table, scans
        ))
        .with_recommendation(format!(
            "Create an index on {}.{} to avoid repeated sequential scans",
            table, column
        ))
        .with_evidence("sequential_scans", scans)
        .with_evidence("table_name", &table)
        .with_evidence("column_name", &column);

        if let Some(delta) = delta {
            detection = detection.with_evidence("sequential_scans_delta", format_metric(delta));
        }

        Some(detection)
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.count_threshold = thresholds.sequential_scan_count;
        self.delta_threshold = thresholds.sequential_scan_delta;
    }
}
