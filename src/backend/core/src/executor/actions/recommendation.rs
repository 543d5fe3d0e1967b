//! Suggestion-only and unimplemented actions.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::contracts::ActionResult;
use crate::error::{ErrorCode, MedicError, Result};

use super::{Action, ActionContext};

/// Persists suggestion text; mutates nothing.
pub struct RecommendationAction {
    action_type: String,
    text: String,
}

impl RecommendationAction {
    pub fn new(action_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl Action for RecommendationAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn validate(&self, _ctx: &ActionContext) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let text = if self.text.is_empty() {
            ctx.detection.recommendation.clone()
        } else {
            self.text.clone()
        };

        Ok(ActionResult::completed(text.clone())
            .with_change("recommendation", text)
            .with_solution(format!("Recommendation recorded: {}", self.action_type)))
    }

    async fn rollback(&self, _ctx: &ActionContext) -> Result<String> {
        Err(MedicError::new(
            ErrorCode::RollbackNotAllowed,
            "Recommendations mutate nothing",
        ))
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([("text".to_string(), self.text.clone())])
    }
}

/// Acknowledged action type with no implementation: stored, never executed.
pub struct PendingAction {
    action_type: String,
    metadata: HashMap<String, String>,
}

impl PendingAction {
    pub fn new(action_type: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        Self {
            action_type: action_type.into(),
            metadata,
        }
    }
}

#[async_trait]
impl Action for PendingAction {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn validate(&self, _ctx: &ActionContext) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &ActionContext) -> Result<ActionResult> {
        // No adapter is touched on this path.
        Ok(ActionResult::pending_implementation(&self.action_type))
    }

    async fn rollback(&self, _ctx: &ActionContext) -> Result<String> {
        Err(MedicError::new(
            ErrorCode::RollbackNotAllowed,
            "Nothing was executed",
        ))
    }

    fn metadata(&self) -> HashMap<String, String> {
        self.metadata.clone()
    }
}
