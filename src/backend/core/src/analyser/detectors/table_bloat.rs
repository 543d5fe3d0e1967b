//! Table bloat detection.
//!
//! Walks the per-table live/dead tuple extended metrics, scoring each table's
//! dead-tuple ratio and flagging the worst. Cutoffs: 0.20 warning, 0.30
//! critical.

use crate::contracts::snapshot::keys;
use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

const WARNING_CUTOFF: f64 = 0.20;
const CRITICAL_CUTOFF: f64 = 0.30;

pub struct TableBloatDetector {
    ratio_threshold: f64,
}

impl TableBloatDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            ratio_threshold: thresholds.bloat_ratio,
        }
    }

    /// Worst `dead / (dead + live)` across the per-table extended metrics.
    fn worst_bloat(snapshot: &Snapshot) -> Option<(String, f64, f64)> {
        let mut worst: Option<(String, f64, f64)> = None;

        for (key, dead) in &snapshot.extended {
            let Some(table) = key
                .strip_prefix(keys::TABLE_PREFIX)
                .and_then(|rest| rest.strip_suffix(keys::DEAD_TUPLES_SUFFIX))
            else {
                continue;
            };

            let live_key = format!(
                "{}{}{}",
                keys::TABLE_PREFIX,
                table,
                keys::LIVE_TUPLES_SUFFIX
            );
            let Some(live) = snapshot.extended_metric(&live_key) else {
                continue;
            };

            let total = dead + live;
            if total <= 0.0 {
                continue;
            }
            let ratio = dead / total;
            if worst.as_ref().map(|(_, r, _)| ratio > *r).unwrap_or(true) {
                worst = Some((table.to_string(), ratio, *dead));
            }
        }

        worst
    }
}

impl Detector for TableBloatDetector {
    fn name(&self) -> &'static str {
        "table_bloat"
    }

    fn category(&self) -> Category {
        Category::Storage
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let (table, ratio, dead) = Self::worst_bloat(snapshot)?;
        if ratio <= self.ratio_threshold {
            return None;
        }

        let severity = if ratio >= CRITICAL_CUTOFF {
            Severity::Critical
        } else if ratio >= WARNING_CUTOFF {
            Severity::Warning
        } else {
            Severity::Info
        };

        Some(
            Detection::new(
                self.name(),
                self.category(),
                severity,
                snapshot.database_id.clone(),
                ActionPlan::VacuumTable {
                    table_name: table.clone(),
                },
            )
            .with_title(format!("Table {} is {:.0}% dead tuples", table, ratio * 100.0))
            .with_description(format!(
                "Table {} carries {:.0} dead tuples ({:.1}% of the table)",
                table,
                dead,
                ratio * 100.0
            ))
            .with_recommendation(format!("Vacuum-analyse {} to reclaim dead tuples", table))
            .with_evidence("table_name", &table)
            .with_evidence("bloat_ratio", format_metric(ratio))
            .with_evidence("dead_tuples", format_metric(dead)),
        )
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.ratio_threshold = thresholds.bloat_ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::snapshot;
    use super::*;

    fn fixture(table: &str, live: f64, dead: f64) -> Snapshot {
        let mut s = snapshot("db-1");
        s.extended.insert(
            format!("{}{}{}", keys::TABLE_PREFIX, table, keys::LIVE_TUPLES_SUFFIX),
            live,
        );
        s.extended.insert(
            format!("{}{}{}", keys::TABLE_PREFIX, table, keys::DEAD_TUPLES_SUFFIX),
            dead,
        );
        s
    }

    #[test]
    fn test_fires_above_threshold() {
        let detector = TableBloatDetector::new(&Thresholds::default());
        // 150 / 1000 = 0.15
        let d = detector.detect(&fixture("orders", 850.0, 150.0)).unwrap();

        assert_eq!(d.severity, Severity::Info);
        assert_eq!(d.action_type(), "vacuum_table");
        assert_eq!(d.key(), "db-1:table_bloat:orders");
    }

    #[test]
    fn test_severity_cutoffs() {
        let detector = TableBloatDetector::new(&Thresholds::default());

        let d = detector.detect(&fixture("orders", 750.0, 250.0)).unwrap();
        assert_eq!(d.severity, Severity::Warning);

        let d = detector.detect(&fixture("orders", 600.0, 400.0)).unwrap();
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn test_picks_worst_table() {
        let detector = TableBloatDetector::new(&Thresholds::default());
        let mut s = fixture("orders", 900.0, 100.0);
        let worse = fixture("sessions", 500.0, 500.0);
        s.extended.extend(worse.extended);

        let d = detector.detect(&s).unwrap();
        assert!(matches!(
            d.plan,
            ActionPlan::VacuumTable { ref table_name } if table_name == "sessions"
        ));
    }

    #[test]
    fn test_healthy_tables_are_quiet() {
        let detector = TableBloatDetector::new(&Thresholds::default());
        assert!(detector.detect(&fixture("orders", 990.0, 10.0)).is_none());
        assert!(detector.detect(&snapshot("db-1")).is_none());
    }
}
