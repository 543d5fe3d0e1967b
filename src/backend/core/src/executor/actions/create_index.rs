//! Index creation.
//!
//! Builds `idx_<db>_<table>_<column>`, concurrently when the adapter declares
//! support. Creation is rejected when the index already exists; rollback
//! drops exactly the index this action created.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::contracts::{ActionResult, Capability, IndexPriority};
use crate::error::{MedicError, Result};

use super::{sanitize_identifier, Action, ActionContext};
use crate::executor::db::require_capability;

pub struct CreateIndexAction {
    table: String,
    column: String,
    priority: IndexPriority,
    /// Name of the index this execution created, captured for rollback.
    created: Mutex<Option<String>>,
}

impl CreateIndexAction {
    pub fn new(table: impl Into<String>, column: impl Into<String>, priority: IndexPriority) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            priority,
            created: Mutex::new(None),
        }
    }

    fn index_name(&self, database_id: &str) -> String {
        format!(
            "idx_{}_{}_{}",
            sanitize_identifier(database_id),
            sanitize_identifier(&self.table),
            sanitize_identifier(&self.column),
        )
    }
}

#[async_trait]
impl Action for CreateIndexAction {
    fn action_type(&self) -> &str {
        "create_index"
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<()> {
        require_capability(ctx.adapter.as_ref(), self.action_type(), Capability::SupportsIndexes)?;
        if self.table.is_empty() || self.column.is_empty() {
            return Err(MedicError::configuration(
                "create_index requires a table and a column",
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let name = self.index_name(&ctx.detection.database_id);

        if ctx.adapter.index_exists(&name).await? {
            return Err(MedicError::index_already_exists(&name));
        }

        let concurrent = ctx
            .adapter
            .capabilities()
            .contains(&Capability::SupportsConcurrentIndexes);

        ctx.adapter
            .create_index(&name, &self.table, &self.column, concurrent)
            .await?;
        *self.created.lock() = Some(name.clone());

        Ok(ActionResult::completed(format!(
            "Created index {} on {}({})",
            name, self.table, self.column
        ))
        .with_change("index_name", &name)
        .with_change("table_name", &self.table)
        .with_change("column_name", &self.column)
        .with_change("concurrent", concurrent)
        .with_rollback())
    }

    async fn rollback(&self, ctx: &ActionContext) -> Result<String> {
        let name = self
            .created
            .lock()
            .clone()
            .unwrap_or_else(|| self.index_name(&ctx.detection.database_id));

        let concurrent = ctx
            .adapter
            .capabilities()
            .contains(&Capability::SupportsConcurrentIndexes);
        ctx.adapter.drop_index(&name, concurrent).await?;

        Ok(format!("Dropped index {}", name))
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("table_name".to_string(), self.table.clone()),
            ("column_name".to_string(), self.column.clone()),
            ("priority".to_string(), self.priority.as_str().to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use crate::contracts::{ActionPlan, ActionStatus};
    use crate::error::ErrorCode;

    fn plan() -> ActionPlan {
        ActionPlan::CreateIndex {
            table_name: "users".to_string(),
            column_name: "email".to_string(),
            priority: IndexPriority::High,
        }
    }

    #[tokio::test]
    async fn test_execute_creates_named_index() {
        let (adapter, _, ctx) = context(plan());
        let action = CreateIndexAction::new("users", "email", IndexPriority::High);

        action.validate(&ctx).await.unwrap();
        let result = action.execute(&ctx).await.unwrap();

        assert_eq!(result.status, ActionStatus::Completed);
        assert!(result.can_rollback);
        assert!(adapter.has_index("idx_db_1_users_email"));
        assert_eq!(
            result.changes.get("index_name").map(String::as_str),
            Some("idx_db_1_users_email")
        );
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let (_, _, ctx) = context(plan());
        let action = CreateIndexAction::new("users", "email", IndexPriority::High);

        action.execute(&ctx).await.unwrap();

        let again = CreateIndexAction::new("users", "email", IndexPriority::High);
        let err = again.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IndexAlreadyExists);
    }

    #[tokio::test]
    async fn test_rollback_restores_pre_state() {
        let (adapter, _, ctx) = context(plan());
        let action = CreateIndexAction::new("users", "email", IndexPriority::High);

        action.execute(&ctx).await.unwrap();
        assert!(adapter.has_index("idx_db_1_users_email"));

        let summary = action.rollback(&ctx).await.unwrap();
        assert!(summary.contains("idx_db_1_users_email"));
        assert!(!adapter.has_index("idx_db_1_users_email"));
    }

    #[tokio::test]
    async fn test_validate_requires_capability() {
        let (_, _, mut ctx) = context(plan());
        ctx.adapter = std::sync::Arc::new(
            crate::executor::db::MemoryActionAdapter::with_capabilities(vec![
                crate::contracts::Capability::SupportsVacuum,
            ]),
        );

        let action = CreateIndexAction::new("users", "email", IndexPriority::High);
        let err = action.validate(&ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ActionNotSupported);
    }
}
