//! Placeholder resolution over earlier step outputs
//!
//! Params may reference the output of a completed step with
//! `${<stepId>.<path>}`. A path is a `.`-separated list of object keys and
//! array indices addressing the step's serialized execution result, e.g.
//! `${step1.data.plans.0.plan_id}`.
//!
//! A string consisting of exactly one placeholder is replaced by the
//! referenced value with its JSON type intact. Placeholders inside longer
//! strings are interpolated as text. Anything that does not resolve is an
//! error; nothing is ever silently replaced by `null`.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

/// Placeholder that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// No result is available for the referenced step
    #[error("Placeholder '{expression}' references step '{step_id}', which has no result")]
    UnknownStep { expression: String, step_id: String },

    /// The step result has nothing at the referenced path
    #[error("Placeholder '{expression}': no value at '{path}' in result of step '{step_id}'")]
    MissingPath {
        expression: String,
        step_id: String,
        path: String,
    },

    /// The placeholder is not of the form `${stepId.path}`
    #[error("Malformed placeholder '{expression}'")]
    Malformed { expression: String },
}

/// Resolves placeholders against the outputs of completed steps
#[derive(Debug, Clone, Copy)]
pub struct PlaceholderResolver<'a> {
    outputs: &'a HashMap<String, Value>,
}

impl<'a> PlaceholderResolver<'a> {
    /// `outputs` maps step ids to their serialized execution results
    pub fn new(outputs: &'a HashMap<String, Value>) -> Self {
        Self { outputs }
    }

    /// Resolve every placeholder in `value`, recursing through objects and
    /// arrays
    pub fn resolve(&self, value: &Value) -> Result<Value, ResolutionError> {
        match value {
            Value::String(text) => self.resolve_string(text),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(obj) => {
                let mut resolved = Map::with_capacity(obj.len());
                for (key, item) in obj {
                    resolved.insert(key.clone(), self.resolve(item)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, text: &str) -> Result<Value, ResolutionError> {
        let mut found = PLACEHOLDER_RE.captures_iter(text).peekable();
        if found.peek().is_none() {
            return Ok(Value::String(text.to_string()));
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in found {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self.lookup(whole.as_str(), inner.as_str())?;

            // Exactly one placeholder: keep the JSON type
            if whole.start() == 0 && whole.end() == text.len() {
                return Ok(value);
            }

            out.push_str(&text[last..whole.start()]);
            match value {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(Value::String(out))
    }

    fn lookup(&self, expression: &str, inner: &str) -> Result<Value, ResolutionError> {
        let inner = inner.trim();
        let (step_id, path) = match inner.split_once('.') {
            Some((step_id, path)) => (step_id, Some(path)),
            None => (inner, None),
        };
        if step_id.is_empty() || path.is_some_and(|p| p.split('.').any(str::is_empty)) {
            return Err(ResolutionError::Malformed {
                expression: expression.to_string(),
            });
        }

        let document = self
            .outputs
            .get(step_id)
            .ok_or_else(|| ResolutionError::UnknownStep {
                expression: expression.to_string(),
                step_id: step_id.to_string(),
            })?;

        let Some(path) = path else {
            return Ok(document.clone());
        };

        let mut current = document;
        for segment in path.split('.') {
            let next = match current {
                Value::Object(obj) => obj.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| ResolutionError::MissingPath {
                expression: expression.to_string(),
                step_id: step_id.to_string(),
                path: path.to_string(),
            })?;
        }
        Ok(current.clone())
    }
}

/// Step ids referenced by placeholders anywhere in `value`
pub fn referenced_steps(value: &Value) -> Vec<String> {
    let mut steps = Vec::new();
    collect_references(value, &mut steps);
    steps.sort();
    steps.dedup();
    steps
}

fn collect_references(value: &Value, steps: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            for caps in PLACEHOLDER_RE.captures_iter(text) {
                if let Some(inner) = caps.get(1) {
                    let inner = inner.as_str().trim();
                    let step = inner.split_once('.').map(|(s, _)| s).unwrap_or(inner);
                    if !step.is_empty() {
                        steps.push(step.to_string());
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, steps)),
        Value::Object(obj) => obj.values().for_each(|item| collect_references(item, steps)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs() -> HashMap<String, Value> {
        let mut outputs = HashMap::new();
        outputs.insert(
            "step1".to_string(),
            json!({
                "success": true,
                "data": { "plans": [ { "plan_id": "p-42", "steps": 3 } ] },
                "fromCache": false
            }),
        );
        outputs.insert(
            "failed".to_string(),
            json!({ "success": false, "data": null, "error": { "kind": "execution" } }),
        );
        outputs
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let outputs = outputs();
        let resolver = PlaceholderResolver::new(&outputs);

        assert_eq!(
            resolver.resolve(&json!("${step1.data.plans.0.steps}")).unwrap(),
            json!(3)
        );
        assert_eq!(
            resolver.resolve(&json!("${step1.data.plans}")).unwrap(),
            json!([{ "plan_id": "p-42", "steps": 3 }])
        );
        assert_eq!(resolver.resolve(&json!("${step1.success}")).unwrap(), json!(true));
    }

    #[test]
    fn test_embedded_placeholders_interpolate() {
        let outputs = outputs();
        let resolver = PlaceholderResolver::new(&outputs);

        let resolved = resolver
            .resolve(&json!({
                "title": "Plan ${step1.data.plans.0.plan_id} has ${step1.data.plans.0.steps} steps",
                "ids": ["${step1.data.plans.0.plan_id}", "static"],
                "limit": 5
            }))
            .unwrap();

        assert_eq!(
            resolved,
            json!({ "title": "Plan p-42 has 3 steps", "ids": ["p-42", "static"], "limit": 5 })
        );
    }

    #[test]
    fn test_unresolved_placeholders_are_errors() {
        let outputs = outputs();
        let resolver = PlaceholderResolver::new(&outputs);

        assert!(matches!(
            resolver.resolve(&json!("${nope.data}")),
            Err(ResolutionError::UnknownStep { step_id, .. }) if step_id == "nope"
        ));
        assert!(matches!(
            resolver.resolve(&json!("${step1.data.plans.7.plan_id}")),
            Err(ResolutionError::MissingPath { .. })
        ));
        assert!(matches!(
            resolver.resolve(&json!("${failed.data.id}")),
            Err(ResolutionError::MissingPath { .. })
        ));
        assert!(matches!(
            resolver.resolve(&json!("${step1..data}")),
            Err(ResolutionError::Malformed { .. })
        ));
        assert!(matches!(
            resolver.resolve(&json!("${}")),
            Err(ResolutionError::Malformed { .. })
        ));
    }

    #[test]
    fn test_plain_values_pass_through() {
        let outputs = HashMap::new();
        let resolver = PlaceholderResolver::new(&outputs);
        let params = json!({ "text": "costs $5 {not a placeholder}", "n": null });
        assert_eq!(resolver.resolve(&params).unwrap(), params);
    }

    #[test]
    fn test_referenced_steps() {
        let params = json!({ "a": "${s2.data}", "b": ["x ${s1.data.id} y", "${s2.meta}"] });
        assert_eq!(referenced_steps(&params), vec!["s1", "s2"]);
    }
}
