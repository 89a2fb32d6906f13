//! Plan execution

use super::OrchestrationError;
use super::plan::{OnFailure, OrchestrationPlan, PlanStep};
use super::resolver::PlaceholderResolver;
use crate::config::OrchestratorConfig;
use crate::runtime::ToolExecutor;
use crate::tools::{ExecutionResult, ToolContext, ToolError, duration_millis};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Never attempted because the plan aborted
    Skipped,
}

/// Record of one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub tool_name: String,
    pub status: StepStatus,

    /// Executor result; absent for skipped steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl StepResult {
    fn executed(step: &PlanStep, result: ExecutionResult, duration: Duration) -> Self {
        let status = if result.success {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        Self {
            step_id: step.step_id.clone(),
            tool_name: step.tool_name.clone(),
            status,
            error: result.error.clone(),
            result: Some(result),
            duration,
        }
    }

    fn skipped(step: &PlanStep) -> Self {
        Self {
            step_id: step.step_id.clone(),
            tool_name: step.tool_name.clone(),
            status: StepStatus::Skipped,
            result: None,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Outcome of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub plan_id: String,

    /// False when a step with `onFailure=abort` failed
    pub success: bool,

    #[serde(with = "duration_millis")]
    pub total_duration: Duration,

    /// One entry per plan step, in declaration order
    pub step_results: Vec<StepResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_steps: Vec<String>,

    /// Step whose failure halted the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_by: Option<String>,
}

impl OrchestrationResult {
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|s| s.step_id == step_id)
    }

    /// Ids of steps that ran and failed
    pub fn failed_steps(&self) -> Vec<&str> {
        self.step_results
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.step_id.as_str())
            .collect()
    }
}

/// Runs plans through a shared executor
///
/// A step is ready once every step it depends on has finished. Ready steps
/// form a wave; each step's params are resolved against the outputs of the
/// steps finished before the wave started.
pub struct Orchestrator {
    executor: Arc<ToolExecutor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self {
            executor,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute a plan to completion or abort
    ///
    /// Only an invalid plan is an `Err`; step failures are reported in the
    /// returned result.
    pub async fn execute_plan(
        &self,
        plan: &OrchestrationPlan,
        ctx: &ToolContext,
    ) -> Result<OrchestrationResult, OrchestrationError> {
        plan.validate()?;

        let started = Instant::now();
        tracing::info!(
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            parallel = self.config.parallel,
            "Executing orchestration plan"
        );

        let mut finished: HashMap<String, StepResult> = HashMap::new();
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let mut pending: Vec<&PlanStep> = plan.steps.iter().collect();
        let mut aborted_by: Option<String> = None;

        while !pending.is_empty() && aborted_by.is_none() {
            let (ready, blocked): (Vec<&PlanStep>, Vec<&PlanStep>) = {
                let done: HashSet<&str> = finished.keys().map(String::as_str).collect();
                pending
                    .into_iter()
                    .partition(|step| step.depends_on.iter().all(|dep| done.contains(dep.as_str())))
            };

            if ready.is_empty() {
                // Unreachable for a validated plan
                tracing::warn!(
                    plan_id = %plan.plan_id,
                    blocked = blocked.len(),
                    "Plan steps have unsatisfiable dependencies"
                );
                break;
            }

            let batch_size = if self.config.parallel {
                self.config.max_parallel_steps.max(1)
            } else {
                1
            };

            let mut leftover: Vec<&PlanStep> = Vec::new();
            for batch in ready.chunks(batch_size) {
                if aborted_by.is_some() {
                    leftover.extend_from_slice(batch);
                    continue;
                }

                let results = {
                    let snapshot = &outputs;
                    join_all(batch.iter().map(|step| self.run_step(step, snapshot, ctx))).await
                };

                for (step, step_result) in batch.iter().zip(results) {
                    if let Some(result) = &step_result.result {
                        match serde_json::to_value(result) {
                            Ok(document) => {
                                outputs.insert(step.step_id.clone(), document);
                            }
                            Err(e) => {
                                tracing::warn!(step_id = %step.step_id, error = %e, "Failed to serialize step output");
                            }
                        }
                    }

                    if !step_result.succeeded() {
                        let reason = step_result
                            .error
                            .as_ref()
                            .map(|e| e.message.as_str())
                            .unwrap_or("unknown error");
                        tracing::warn!(
                            plan_id = %plan.plan_id,
                            step_id = %step.step_id,
                            tool = %step.tool_name,
                            on_failure = ?step.on_failure,
                            error = %reason,
                            "Plan step failed"
                        );
                        if step.on_failure == OnFailure::Abort && aborted_by.is_none() {
                            aborted_by = Some(step.step_id.clone());
                        }
                    }
                    finished.insert(step.step_id.clone(), step_result);
                }
            }

            leftover.extend(blocked);
            pending = leftover;
        }

        let mut skipped_steps = Vec::new();
        let step_results = plan
            .steps
            .iter()
            .map(|step| {
                finished.remove(&step.step_id).unwrap_or_else(|| {
                    skipped_steps.push(step.step_id.clone());
                    StepResult::skipped(step)
                })
            })
            .collect::<Vec<_>>();

        if let Some(step_id) = &aborted_by {
            tracing::warn!(
                plan_id = %plan.plan_id,
                step_id = %step_id,
                skipped = skipped_steps.len(),
                "Orchestration plan aborted"
            );
        }

        let result = OrchestrationResult {
            plan_id: plan.plan_id.clone(),
            success: aborted_by.is_none(),
            total_duration: started.elapsed(),
            step_results,
            skipped_steps,
            aborted_by,
        };

        tracing::info!(
            plan_id = %result.plan_id,
            success = result.success,
            duration_ms = result.total_duration.as_millis() as u64,
            "Orchestration plan finished"
        );
        Ok(result)
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        outputs: &HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> StepResult {
        let started = Instant::now();
        let result = match PlaceholderResolver::new(outputs).resolve(&step.params) {
            Ok(params) => {
                tracing::debug!(step_id = %step.step_id, tool = %step.tool_name, "Running plan step");
                self.executor.execute(&step.tool_name, params, ctx).await
            }
            Err(e) => ExecutionResult::failure(
                step.tool_name.clone(),
                ToolError::resolution(e.to_string()),
                started.elapsed(),
            ),
        };
        StepResult::executed(step, result, started.elapsed())
    }
}
