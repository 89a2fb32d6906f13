//! Protocol adapters for upstream tool-call formats
//!
//! Model providers and agent frameworks describe tool calls in different
//! shapes. A [`ProtocolAdapter`] recognizes one shape, normalizes it into a
//! [`NormalizedToolCall`] the executor can run, and may render the outcome
//! back as text for the model. The [`ProtocolRegistry`] tries adapters in
//! registration order, so more specific formats must be registered first.
//!
//! # Example
//!
//! ```rust,no_run
//! use toolrun_core::protocol::ProtocolRegistry;
//! use serde_json::json;
//!
//! let protocols = ProtocolRegistry::with_defaults();
//! let call = protocols
//!     .parse(&json!({"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}))
//!     .unwrap();
//! assert_eq!(call.tool_name, "search");
//! ```

mod adapters;
mod registry;

pub use adapters::{AnthropicAdapter, GenericAdapter, OpenAiAdapter, ReActAdapter};
pub use registry::ProtocolRegistry;

use crate::tools::{ExecutionResult, ToolContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol-independent tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedToolCall {
    pub tool_name: String,
    pub params: Value,
    /// Adapter-specific extras (call id, protocol name, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl NormalizedToolCall {
    pub fn new(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// Text rendering of a result, for feeding back to a model
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResult {
    pub result_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl TextResult {
    /// Render any execution result as text
    ///
    /// Successful string payloads are used verbatim and other payloads are
    /// pretty-printed JSON. Sources come from `data.sources`, either strings
    /// or objects carrying a `url`.
    pub fn from_execution(result: &ExecutionResult) -> Self {
        let result_text = if result.success {
            match &result.data {
                Value::String(text) => text.clone(),
                Value::Null => result.message.clone().unwrap_or_default(),
                data => serde_json::to_string_pretty(data).unwrap_or_default(),
            }
        } else {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .or_else(|| result.message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            format!("Error: {}", reason)
        };

        let sources = result
            .data
            .get("sources")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(url) => Some(url.clone()),
                        Value::Object(obj) => obj.get("url").and_then(Value::as_str).map(String::from),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            result_text,
            sources,
        }
    }
}

/// Errors raised while recognizing or normalizing a tool call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// No registered adapter recognized the payload
    #[error("No protocol adapter can handle the tool call")]
    Unsupported,

    /// The payload looked like the protocol but is structurally broken
    #[error("Malformed {protocol} tool call: {reason}")]
    Malformed { protocol: String, reason: String },

    /// The call's arguments could not be turned into a params object
    #[error("Invalid {protocol} tool arguments: {reason}")]
    InvalidArguments { protocol: String, reason: String },
}

impl ProtocolError {
    pub fn malformed(protocol: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            protocol: protocol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_arguments(protocol: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            protocol: protocol.to_string(),
            reason: reason.into(),
        }
    }
}

/// One upstream tool-call format
pub trait ProtocolAdapter: Send + Sync {
    /// Adapter name, recorded as `meta.protocol` on parsed calls
    fn name(&self) -> &str;

    /// Whether the payload is in this adapter's format
    ///
    /// An `Err` is treated by the registry as a non-match.
    fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError>;

    fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError>;

    /// Protocol-specific text rendering; `None` falls back to
    /// [`TextResult::from_execution`]
    fn format_to_text_result(
        &self,
        _result: &ExecutionResult,
        _ctx: &ToolContext,
    ) -> Option<TextResult> {
        None
    }
}

/// Turn an arguments value into a params object
///
/// Accepts an object, a JSON string encoding an object, or nothing (empty
/// object).
pub(crate) fn arguments_to_params(protocol: &str, arguments: Option<&Value>) -> Result<Value, ProtocolError> {
    match arguments {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(Value::Object(obj)) => Ok(Value::Object(obj.clone())),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(Value::Object(Map::new())),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(obj)) => Ok(Value::Object(obj)),
            Ok(other) => Err(ProtocolError::invalid_arguments(
                protocol,
                format!("expected a JSON object, got {}", json_type(&other)),
            )),
            Err(e) => Err(ProtocolError::invalid_arguments(protocol, e.to_string())),
        },
        Some(other) => Err(ProtocolError::invalid_arguments(
            protocol,
            format!("expected an object, got {}", json_type(other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolResult};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_arguments_to_params() {
        assert_eq!(arguments_to_params("t", None).unwrap(), json!({}));
        assert_eq!(
            arguments_to_params("t", Some(&json!("{\"a\": 1}"))).unwrap(),
            json!({"a": 1})
        );
        assert!(arguments_to_params("t", Some(&json!("[1]"))).is_err());
        assert!(arguments_to_params("t", Some(&json!("{oops"))).is_err());
        assert!(arguments_to_params("t", Some(&json!(3))).is_err());
    }

    #[test]
    fn test_default_text_rendering() {
        let result = ExecutionResult::from_tool_result(
            "search",
            ToolResult::success(json!({
                "hits": 2,
                "sources": ["https://a.example", {"url": "https://b.example"}, 7]
            })),
            Duration::ZERO,
        );
        let text = TextResult::from_execution(&result);
        assert!(text.result_text.contains("\"hits\": 2"));
        assert_eq!(text.sources, vec!["https://a.example", "https://b.example"]);

        let failed = ExecutionResult::failure("search", ToolError::execution("offline"), Duration::ZERO);
        assert_eq!(TextResult::from_execution(&failed).result_text, "Error: offline");
    }
}
