//! Orchestration plan documents

use super::OrchestrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// What happens to the plan when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Halt the plan; remaining steps are skipped
    #[default]
    Abort,
    /// Record the failure and let dependents run
    Continue,
}

/// One tool call in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Unique within the plan
    #[serde(alias = "step_id")]
    pub step_id: String,

    #[serde(alias = "tool_name")]
    pub tool_name: String,

    /// Params, possibly containing `${stepId.path}` placeholders
    #[serde(default = "empty_params")]
    pub params: Value,

    /// Steps that must finish first
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<String>,

    #[serde(default, alias = "on_failure")]
    pub on_failure: OnFailure,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

impl PlanStep {
    pub fn new(step_id: impl Into<String>, tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            step_id: step_id.into(),
            tool_name: tool_name.into(),
            params,
            depends_on: Vec::new(),
            on_failure: OnFailure::Abort,
            description: None,
        }
    }

    /// Add a dependency
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_on_failure(mut self, policy: OnFailure) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn continue_on_failure(self) -> Self {
        self.with_on_failure(OnFailure::Continue)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A DAG of tool calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    #[serde(default = "generate_plan_id", alias = "plan_id")]
    pub plan_id: String,

    #[serde(default = "Utc::now", alias = "created_at")]
    pub created_at: DateTime<Utc>,

    pub steps: Vec<PlanStep>,
}

fn generate_plan_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OrchestrationPlan {
    /// Create a plan with a generated id
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: generate_plan_id(),
            created_at: Utc::now(),
            steps,
        }
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = plan_id.into();
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Check structural invariants
    ///
    /// Step ids are unique, and every dependency names a different step
    /// declared earlier in the plan. Declaration order is therefore a
    /// topological order and the graph cannot contain cycles.
    ///
    /// A step may only reference, through placeholders, steps it depends on
    /// directly or transitively, so its inputs are the same whether the plan
    /// runs in waves or one step at a time.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.steps.is_empty() {
            return Err(self.invalid("plan has no steps"));
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.step_id.is_empty() {
                return Err(self.invalid(format!("step at position {} has an empty id", index)));
            }
            if step.tool_name.is_empty() {
                return Err(self.invalid(format!("step '{}' has no tool name", step.step_id)));
            }
            if positions.insert(step.step_id.as_str(), index).is_some() {
                return Err(self.invalid(format!("duplicate step id '{}'", step.step_id)));
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                if dep == &step.step_id {
                    return Err(self.invalid(format!("step '{}' depends on itself", dep)));
                }
                match positions.get(dep.as_str()) {
                    None => {
                        return Err(self.invalid(format!(
                            "step '{}' depends on unknown step '{}'",
                            step.step_id, dep
                        )));
                    }
                    Some(&position) if position > index => {
                        return Err(self.invalid(format!(
                            "step '{}' depends on '{}', which is declared after it",
                            step.step_id, dep
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        // Earlier steps are complete by the time a later one is reached
        let mut upstream: HashMap<&str, HashSet<&str>> = HashMap::new();
        for step in &self.steps {
            let mut ancestors = HashSet::new();
            for dep in &step.depends_on {
                ancestors.insert(dep.as_str());
                if let Some(inherited) = upstream.get(dep.as_str()) {
                    ancestors.extend(inherited.iter().copied());
                }
            }

            for referenced in super::resolver::referenced_steps(&step.params) {
                if !ancestors.contains(referenced.as_str()) {
                    return Err(self.invalid(format!(
                        "step '{}' references '{}' in a placeholder but does not depend on it",
                        step.step_id, referenced
                    )));
                }
            }
            upstream.insert(step.step_id.as_str(), ancestors);
        }
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> OrchestrationError {
        OrchestrationError::InvalidPlan {
            plan_id: self.plan_id.clone(),
            reason: reason.into(),
        }
    }

    /// Parse and validate a JSON plan document
    pub fn from_json_str(document: &str) -> crate::error::Result<Self> {
        let plan: Self = serde_json::from_str(document)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse and validate a YAML plan document
    pub fn from_yaml_str(document: &str) -> crate::error::Result<Self> {
        let plan: Self = serde_yaml::from_str(document)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan file; `.yaml`/`.yml` are read as YAML, anything else as JSON
    pub fn from_file(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&document),
            _ => Self::from_json_str(&document),
        }
    }
}
