//! Multi-step tool orchestration
//!
//! An [`OrchestrationPlan`] is a DAG of tool calls. The [`Orchestrator`]
//! runs it through a [`ToolExecutor`](crate::runtime::ToolExecutor),
//! feeding earlier results into later params via `${stepId.path}`
//! placeholders and applying each step's `onFailure` policy.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolrun_core::orchestration::{OrchestrationPlan, Orchestrator, PlanStep};
//! use toolrun_core::runtime::ToolExecutor;
//! use toolrun_core::tools::{ToolContext, ToolRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(ToolExecutor::new(Arc::new(ToolRegistry::new())));
//! let plan = OrchestrationPlan::new(vec![
//!     PlanStep::new("list", "plan_list", json!({})),
//!     PlanStep::new("get", "plan_get", json!({"id": "${list.data.0.id}"})).depends_on("list"),
//! ]);
//!
//! let result = Orchestrator::new(executor)
//!     .execute_plan(&plan, &ToolContext::new("user-1"))
//!     .await?;
//! println!("success: {}", result.success);
//! # Ok(())
//! # }
//! ```

mod orchestrator;
mod plan;
mod resolver;

pub use orchestrator::{OrchestrationResult, Orchestrator, StepResult, StepStatus};
pub use plan::{OnFailure, OrchestrationPlan, PlanStep};
pub use resolver::{PlaceholderResolver, ResolutionError, referenced_steps};

/// Errors that prevent a plan from running at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Invalid plan '{plan_id}': {reason}")]
    InvalidPlan { plan_id: String, reason: String },
}
