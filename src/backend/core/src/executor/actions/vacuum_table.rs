//! Vacuum-analyse of a bloated table.
//!
//! Non-destructive; records before/after dead-tuple counts and never offers
//! rollback.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::contracts::{ActionResult, Capability};
use crate::error::{ErrorCode, MedicError, Result};

use super::{Action, ActionContext};
use crate::executor::db::require_capability;

pub struct VacuumTableAction {
    table: String,
}

impl VacuumTableAction {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

#[async_trait]
impl Action for VacuumTableAction {
    fn action_type(&self) -> &str {
        "vacuum_table"
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<()> {
        require_capability(ctx.adapter.as_ref(), self.action_type(), Capability::SupportsVacuum)?;
        if self.table.is_empty() {
            return Err(MedicError::configuration("vacuum_table requires a table"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let before = ctx.adapter.dead_tuples(&self.table).await?;
        ctx.adapter.vacuum_table(&self.table).await?;
        let after = ctx.adapter.dead_tuples(&self.table).await?;

        Ok(ActionResult::completed(format!(
            "Vacuum-analysed {}: dead tuples {} -> {}",
            self.table, before, after
        ))
        .with_change("table_name", &self.table)
        .with_change("dead_tuples_before", before)
        .with_change("dead_tuples_after", after))
    }

    async fn rollback(&self, _ctx: &ActionContext) -> Result<String> {
        Err(MedicError::new(
            ErrorCode::RollbackNotAllowed,
            "Vacuum is non-destructive and has no rollback",
        ))
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([("table_name".to_string(), self.table.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use crate::contracts::{ActionPlan, ActionStatus};

    fn plan() -> ActionPlan {
        ActionPlan::VacuumTable {
            table_name: "orders".to_string(),
        }
    }

    #[tokio::test]
    async fn test_execute_records_before_and_after() {
        let (adapter, _, ctx) = context(plan());
        adapter.set_dead_tuples("orders", 5_000);

        let action = VacuumTableAction::new("orders");
        action.validate(&ctx).await.unwrap();
        let result = action.execute(&ctx).await.unwrap();

        assert_eq!(result.status, ActionStatus::Completed);
        assert!(!result.can_rollback);
        assert_eq!(
            result.changes.get("dead_tuples_before").map(String::as_str),
            Some("5000")
        );
        assert_eq!(
            result.changes.get("dead_tuples_after").map(String::as_str),
            Some("0")
        );
        assert_eq!(adapter.vacuum_count("orders"), 1);
    }

    #[tokio::test]
    async fn test_rollback_is_refused() {
        let (_, _, ctx) = context(plan());
        let action = VacuumTableAction::new("orders");
        assert!(action.rollback(&ctx).await.is_err());
    }
}
