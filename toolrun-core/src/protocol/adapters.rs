//! Built-in protocol adapters

use super::{NormalizedToolCall, ProtocolAdapter, ProtocolError, TextResult, arguments_to_params};
use crate::tools::{ExecutionResult, ToolContext};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Anthropic `tool_use` content blocks
///
/// ```json
/// {"type": "tool_use", "id": "toolu_01", "name": "search", "input": {"query": "rust"}}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProtocolAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError> {
        Ok(raw.get("type").and_then(Value::as_str) == Some("tool_use")
            && raw.get("name").is_some_and(Value::is_string))
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::malformed(self.name(), "missing tool name"))?;
        let params = arguments_to_params(self.name(), raw.get("input"))?;

        let mut call = NormalizedToolCall::new(name, params);
        if let Some(id) = raw.get("id").filter(|id| id.is_string()) {
            call = call.with_meta("callId", id.clone());
        }
        Ok(call)
    }
}

/// OpenAI function tool calls
///
/// ```json
/// {"id": "call_1", "type": "function", "function": {"name": "search", "arguments": "{\"query\":\"rust\"}"}}
/// ```
///
/// `arguments` may be a JSON-encoded string or an object.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProtocolAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError> {
        let Some(function) = raw.get("function") else {
            return Ok(false);
        };
        let typed_ok = match raw.get("type") {
            None => true,
            Some(kind) => kind.as_str() == Some("function"),
        };
        Ok(typed_ok && function.get("name").is_some_and(Value::is_string))
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
        let function = raw
            .get("function")
            .and_then(Value::as_object)
            .ok_or_else(|| ProtocolError::malformed(self.name(), "missing function object"))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::malformed(self.name(), "missing function name"))?;
        let params = arguments_to_params(self.name(), function.get("arguments"))?;

        let mut call = NormalizedToolCall::new(name, params);
        if let Some(id) = raw.get("id").filter(|id| id.is_string()) {
            call = call.with_meta("callId", id.clone());
        }
        Ok(call)
    }
}

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Action:\s*([A-Za-z0-9_.\-]+)\s*$").unwrap());
static ACTION_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Action Input:\s*(.*?)\s*(?:\n\s*Observation:|$)").unwrap());
static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Thought:\s*(.+)$").unwrap());

/// ReAct-style text emitted by prompting-based agents
///
/// ```text
/// Thought: I should look this up
/// Action: search
/// Action Input: {"query": "rust"}
/// ```
///
/// A non-JSON action input is passed as `{"input": "<text>"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReActAdapter;

impl ProtocolAdapter for ReActAdapter {
    fn name(&self) -> &str {
        "react"
    }

    fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError> {
        Ok(raw.as_str().is_some_and(|text| ACTION_RE.is_match(text)))
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
        let text = raw
            .as_str()
            .ok_or_else(|| ProtocolError::malformed(self.name(), "expected text"))?;
        let action = ACTION_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| ProtocolError::malformed(self.name(), "missing Action line"))?;

        let input = ACTION_INPUT_RE
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        let params = if input.is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(input) {
                Ok(Value::Object(obj)) => Value::Object(obj),
                _ => serde_json::json!({ "input": input }),
            }
        };

        let mut call = NormalizedToolCall::new(action, params);
        if let Some(thought) = THOUGHT_RE.captures(text).and_then(|caps| caps.get(1)) {
            call = call.with_meta("thought", Value::String(thought.as_str().trim().to_string()));
        }
        Ok(call)
    }

    fn format_to_text_result(
        &self,
        result: &ExecutionResult,
        _ctx: &ToolContext,
    ) -> Option<TextResult> {
        let base = TextResult::from_execution(result);
        Some(TextResult {
            result_text: format!("Observation: {}", base.result_text),
            sources: base.sources,
        })
    }
}

const GENERIC_NAME_KEYS: [&str; 3] = ["name", "tool", "toolName"];
const GENERIC_ARG_KEYS: [&str; 4] = ["arguments", "params", "parameters", "input"];

/// Catch-all object format
///
/// Any object naming the tool under `name`, `tool`, or `toolName`, with
/// arguments under `arguments`, `params`, `parameters`, or `input`. Register
/// it last; it matches almost anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdapter;

impl GenericAdapter {
    fn tool_name<'a>(&self, raw: &'a Value) -> Result<Option<&'a str>, ProtocolError> {
        for key in GENERIC_NAME_KEYS {
            match raw.get(key) {
                Some(Value::String(name)) if !name.is_empty() => return Ok(Some(name.as_str())),
                Some(Value::String(_)) => {
                    return Err(ProtocolError::malformed(self.name(), format!("empty '{}'", key)));
                }
                Some(Value::Null) | None => continue,
                Some(_) => {
                    return Err(ProtocolError::malformed(
                        self.name(),
                        format!("'{}' must be a string", key),
                    ));
                }
            }
        }
        Ok(None)
    }
}

impl ProtocolAdapter for GenericAdapter {
    fn name(&self) -> &str {
        "generic"
    }

    fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError> {
        if !raw.is_object() {
            return Ok(false);
        }
        Ok(self.tool_name(raw)?.is_some())
    }

    fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
        let name = self
            .tool_name(raw)?
            .ok_or_else(|| ProtocolError::malformed(self.name(), "missing tool name"))?;
        let arguments = GENERIC_ARG_KEYS.iter().find_map(|key| raw.get(*key));
        let params = arguments_to_params(self.name(), arguments)?;
        Ok(NormalizedToolCall::new(name, params))
    }
}
