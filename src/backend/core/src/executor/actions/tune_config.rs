//! Runtime configuration tuning for high latency.
//!
//! Reads the fixed parameter set, computes per-parameter optima from total
//! system memory, applies only the substitutions that differ, and returns a
//! sample of the slowest statements for the operator. Originals are saved so
//! rollback can restore them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::collector::host;
use crate::contracts::{ActionResult, Capability};
use crate::error::Result;

use super::{Action, ActionContext};
use crate::executor::db::require_capability;

/// Fallback when the host memory probe yields nothing.
const DEFAULT_MEMORY_BYTES: u64 = 8 * 1024 * 1024 * 1024;
const SLOW_QUERY_SAMPLE: i64 = 5;

/// The fixed set of parameters this action manages.
const PARAMETERS: &[&str] = &[
    "shared_buffers",
    "effective_cache_size",
    "work_mem",
    "maintenance_work_mem",
    "random_page_cost",
    "effective_io_concurrency",
];

/// Compute the optimal value for each managed parameter.
///
/// Conventional sizing: a quarter of memory for shared buffers, three
/// quarters visible to the planner, SSD-grade planner costs.
fn compute_optimal(total_memory_bytes: u64) -> HashMap<&'static str, String> {
    let total_mb = (total_memory_bytes / (1024 * 1024)).max(256);

    let shared_buffers = total_mb / 4;
    let effective_cache = total_mb * 3 / 4;
    let work_mem = (total_mb / 64).clamp(4, 64);
    let maintenance = (total_mb / 16).clamp(64, 2_048);

    HashMap::from([
        ("shared_buffers", format!("{}MB", shared_buffers)),
        ("effective_cache_size", format!("{}MB", effective_cache)),
        ("work_mem", format!("{}MB", work_mem)),
        ("maintenance_work_mem", format!("{}MB", maintenance)),
        ("random_page_cost", "1.1".to_string()),
        ("effective_io_concurrency", "200".to_string()),
    ])
}

pub struct TuneConfigAction {
    /// Original values of the parameters this execution changed.
    saved: Mutex<HashMap<String, String>>,
}

impl TuneConfigAction {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TuneConfigAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for TuneConfigAction {
    fn action_type(&self) -> &str {
        "tune_config_high_latency"
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<()> {
        require_capability(
            ctx.adapter.as_ref(),
            self.action_type(),
            Capability::SupportsConfigTuning,
        )
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let memory = host::total_memory_bytes().unwrap_or(DEFAULT_MEMORY_BYTES);
        let optimal = compute_optimal(memory);

        let can_apply = ctx
            .adapter
            .capabilities()
            .contains(&Capability::SupportsRuntimeConfigChanges);

        let mut applied = Vec::new();
        let mut result = ActionResult::completed(String::new());

        for parameter in PARAMETERS {
            let current = match ctx.adapter.get_config(parameter).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(parameter = %parameter, error = %e, "Parameter unreadable");
                    continue;
                }
            };
            let Some(target) = optimal.get(parameter) else {
                continue;
            };
            if &current == target {
                continue;
            }

            if can_apply {
                ctx.adapter.set_config(parameter, target).await?;
                self.saved
                    .lock()
                    .insert(parameter.to_string(), current.clone());
                applied.push(format!("{}: {} -> {}", parameter, current, target));
                result = result.with_change(*parameter, format!("{} -> {}", current, target));
            } else {
                result = result.with_change(
                    format!("suggested.{}", parameter),
                    format!("{} -> {}", current, target),
                );
            }
        }

        // Surface the worst statements so the operator can judge the effect.
        match ctx.adapter.slow_queries(SLOW_QUERY_SAMPLE).await {
            Ok(slow) => {
                for (i, q) in slow.iter().enumerate() {
                    result = result.with_change(
                        format!("slow_query.{}", i),
                        format!("{:.0}ms x{}: {}", q.mean_ms, q.calls, q.query),
                    );
                }
            }
            Err(e) => tracing::debug!(error = %e, "Slow query sample unavailable"),
        }

        if applied.is_empty() {
            result.message =
                "Runtime configuration already at the computed optimum; no action needed"
                    .to_string();
            result.solution = result.message.clone();
            result.can_rollback = false;
        } else {
            result.message = format!("Applied {} configuration changes", applied.len());
            result.solution = format!("Tuned configuration: {}", applied.join(", "));
            result.can_rollback = true;
        }

        Ok(result)
    }

    async fn rollback(&self, ctx: &ActionContext) -> Result<String> {
        let saved = self.saved.lock().clone();
        let mut restored = Vec::new();

        for (parameter, original) in &saved {
            ctx.adapter.set_config(parameter, original).await?;
            restored.push(parameter.clone());
        }

        Ok(format!(
            "Restored original configuration for: {}",
            restored.join(", ")
        ))
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([(
            "parameters".to_string(),
            PARAMETERS.join(","),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use crate::contracts::{ActionPlan, ActionStatus};
    use crate::executor::db::ActionAdapter;

    fn seeded_ctx() -> (
        std::sync::Arc<crate::executor::db::MemoryActionAdapter>,
        ActionContext,
    ) {
        let (adapter, _, ctx) = context(ActionPlan::TuneConfigHighLatency);
        for parameter in PARAMETERS {
            adapter.set_config_value(parameter, "1");
        }
        (adapter, ctx)
    }

    #[test]
    fn test_compute_optimal_shapes() {
        let optimal = compute_optimal(16 * 1024 * 1024 * 1024);
        assert_eq!(optimal["shared_buffers"], "4096MB");
        assert_eq!(optimal["effective_cache_size"], "12288MB");
        assert_eq!(optimal["work_mem"], "64MB");
        assert_eq!(optimal["random_page_cost"], "1.1");
    }

    #[tokio::test]
    async fn test_applies_only_differences_and_saves_originals() {
        let (adapter, ctx) = seeded_ctx();
        let action = TuneConfigAction::new();

        let result = action.execute(&ctx).await.unwrap();
        assert_eq!(result.status, ActionStatus::Completed);
        assert!(result.can_rollback);

        // The adapter now carries tuned values.
        assert_ne!(adapter.get_config("shared_buffers").await.unwrap(), "1");

        // Second run: everything already optimal.
        let again = TuneConfigAction::new();
        let result = again.execute(&ctx).await.unwrap();
        assert!(!result.can_rollback);
        assert!(result.message.contains("no action needed"));
    }

    #[tokio::test]
    async fn test_rollback_restores_originals() {
        let (adapter, ctx) = seeded_ctx();
        let action = TuneConfigAction::new();

        action.execute(&ctx).await.unwrap();
        action.rollback(&ctx).await.unwrap();

        assert_eq!(adapter.get_config("shared_buffers").await.unwrap(), "1");
        assert_eq!(adapter.get_config("work_mem").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_without_runtime_changes_only_suggests() {
        let (_, _, mut ctx) = context(ActionPlan::TuneConfigHighLatency);
        let adapter = std::sync::Arc::new(
            crate::executor::db::MemoryActionAdapter::with_capabilities(vec![
                Capability::SupportsConfigTuning,
            ]),
        );
        for parameter in PARAMETERS {
            adapter.set_config_value(parameter, "1");
        }
        ctx.adapter = adapter.clone();

        let action = TuneConfigAction::new();
        let result = action.execute(&ctx).await.unwrap();

        assert!(!result.can_rollback);
        assert!(result.changes.keys().any(|k| k.starts_with("suggested.")));
        assert_eq!(adapter.get_config("shared_buffers").await.unwrap(), "1");
    }
}
