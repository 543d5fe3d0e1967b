//! Query / session termination.
//!
//! `graceful=true` cancels the running query first and falls back to a
//! forceful backend termination if the session survives; `graceful=false`
//! terminates immediately. Validates the pid before signalling.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::contracts::{ActionResult, Capability};
use crate::error::{MedicError, Result};

use super::{Action, ActionContext};
use crate::executor::db::require_capability;

/// How long a cancelled backend gets to wind down before the forceful path.
const CANCEL_SETTLE: Duration = Duration::from_millis(500);

pub struct TerminateQueryAction {
    pid: i64,
    graceful: bool,
}

impl TerminateQueryAction {
    pub fn new(pid: i64, graceful: bool) -> Self {
        Self { pid, graceful }
    }
}

#[async_trait]
impl Action for TerminateQueryAction {
    fn action_type(&self) -> &str {
        "terminate_query"
    }

    async fn validate(&self, ctx: &ActionContext) -> Result<()> {
        require_capability(
            ctx.adapter.as_ref(),
            self.action_type(),
            Capability::SupportsQueryTermination,
        )?;
        if self.pid <= 0 {
            return Err(MedicError::configuration(
                "terminate_query requires a positive pid",
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        if !ctx.adapter.backend_exists(self.pid).await? {
            return Err(MedicError::pid_not_found(self.pid));
        }

        let method = if self.graceful {
            let cancelled = ctx.adapter.cancel_backend(self.pid).await?;
            tokio::time::sleep(CANCEL_SETTLE).await;

            if cancelled && !ctx.adapter.backend_exists(self.pid).await? {
                "cancelled"
            } else {
                ctx.adapter.terminate_backend(self.pid).await?;
                "terminated after cancel"
            }
        } else {
            ctx.adapter.terminate_backend(self.pid).await?;
            "terminated"
        };

        Ok(ActionResult::completed(format!(
            "Backend {} {}",
            self.pid, method
        ))
        .with_change("pid", self.pid)
        .with_change("method", method))
    }

    async fn rollback(&self, _ctx: &ActionContext) -> Result<String> {
        Err(MedicError::new(
            crate::error::ErrorCode::RollbackNotAllowed,
            "A terminated backend cannot be restored",
        ))
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("pid".to_string(), self.pid.to_string()),
            ("graceful".to_string(), self.graceful.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use crate::contracts::{ActionPlan, ActionStatus};
    use crate::error::ErrorCode;
    use crate::executor::db::ActionAdapter;

    fn plan(graceful: bool) -> ActionPlan {
        ActionPlan::TerminateQuery { pid: 4242, graceful }
    }

    #[tokio::test]
    async fn test_graceful_cancel_succeeds() {
        let (adapter, _, ctx) = context(plan(true));
        adapter.add_backend(4242);

        let action = TerminateQueryAction::new(4242, true);
        let result = action.execute(&ctx).await.unwrap();

        assert_eq!(result.status, ActionStatus::Completed);
        assert!(adapter.was_cancelled(4242));
        assert_eq!(result.changes.get("method").map(String::as_str), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_forceful_path_skips_cancel() {
        let (adapter, _, ctx) = context(plan(false));
        adapter.add_backend(4242);

        let action = TerminateQueryAction::new(4242, false);
        let result = action.execute(&ctx).await.unwrap();

        assert_eq!(result.status, ActionStatus::Completed);
        assert!(!adapter.was_cancelled(4242));
        assert!(!adapter.backend_exists(4242).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_pid_is_semantic_error() {
        let (_, _, ctx) = context(plan(false));
        let action = TerminateQueryAction::new(4242, false);
        let err = action.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PidNotFound);
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_pid() {
        let (_, _, ctx) = context(plan(false));
        let action = TerminateQueryAction::new(0, false);
        assert!(action.validate(&ctx).await.is_err());
    }
}
