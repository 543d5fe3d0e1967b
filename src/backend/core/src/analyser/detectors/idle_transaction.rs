//! Idle-in-transaction detection.
//!
//! Sessions holding a transaction open while idle pin locks and bloat vacuum
//! horizons. Cutoffs: 600 s warning, 900 s critical. Critical sessions are
//! terminated forcefully; milder ones get the graceful cancel first.

use crate::contracts::snapshot::keys;
use crate::contracts::{ActionPlan, Category, Detection, Severity, Snapshot, Thresholds};

use super::{format_metric, Detector};

const WARNING_CUTOFF: f64 = 600.0;
const CRITICAL_CUTOFF: f64 = 900.0;

pub struct IdleTransactionDetector {
    threshold_secs: f64,
}

impl IdleTransactionDetector {
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            threshold_secs: thresholds.idle_transaction_secs,
        }
    }
}

impl Detector for IdleTransactionDetector {
    fn name(&self) -> &'static str {
        "idle_transaction"
    }

    fn category(&self) -> Category {
        Category::Connection
    }

    fn detect(&self, snapshot: &Snapshot) -> Option<Detection> {
        let idle_secs = snapshot.extended_metric(keys::IDLE_TXN_SECS)?;
        if idle_secs <= self.threshold_secs {
            return None;
        }

        let pid: i64 = snapshot.label(keys::IDLE_TXN_PID)?.parse().ok()?;
        if pid <= 0 {
            return None;
        }

        let severity = if idle_secs >= CRITICAL_CUTOFF {
            Severity::Critical
        } else if idle_secs >= WARNING_CUTOFF {
            Severity::Warning
        } else {
            Severity::Info
        };

        // An idle session has nothing to cancel; past the critical cutoff the
        // backend itself is terminated.
        let graceful = severity != Severity::Critical;

        Some(
            Detection::new(
                self.name(),
                self.category(),
                severity,
                snapshot.database_id.clone(),
                ActionPlan::TerminateQuery { pid, graceful },
            )
            .with_title(format!("Transaction idle for {:.0} s", idle_secs))
            .with_description(format!(
                "Backend {} has held a transaction open while idle for {:.0} s",
                pid, idle_secs
            ))
            .with_recommendation("Terminate the session; fix the client's transaction handling")
            .with_evidence("pid", pid)
            .with_evidence("idle_secs", format_metric(idle_secs)),
        )
    }

    fn set_thresholds(&mut self, thresholds: &Thresholds) {
        self.threshold_secs = thresholds.idle_transaction_secs;
    }
}
