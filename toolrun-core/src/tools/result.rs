//! Tool result model and error taxonomy
//!
//! A plugin produces a [`ToolResult`]; the executor wraps it into an
//! [`ExecutionResult`] that also records where the answer came from (live,
//! cache, degraded) and how long the call took. Every failure, whether it was
//! rejected up front or raised by the plugin, is described by a [`ToolError`]
//! whose [`ToolErrorKind`] places it in one of the runtime's error classes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Meta keys inspected when looking for an HTTP-like status code
const STATUS_CODE_KEYS: [&str; 3] = ["statusCode", "status_code", "status"];

/// Outcome produced by a plugin
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the tool considers the call successful
    pub success: bool,

    /// Payload, opaque to the runtime
    #[serde(default)]
    pub data: Value,

    /// Error description for failed calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Free-form metadata (e.g. `statusCode`)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a meta entry
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Attach an HTTP-like status code
    pub fn with_status_code(self, code: u16) -> Self {
        self.with_meta("statusCode", Value::from(code))
    }

    /// Status code carried in `meta`, if any
    pub fn status_code(&self) -> Option<u16> {
        STATUS_CODE_KEYS
            .iter()
            .filter_map(|key| self.meta.get(*key))
            .find_map(value_as_status)
    }
}

fn value_as_status(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// No tool registered under the requested name
    NotFound,

    /// Tool is registered but disabled
    Disabled,

    /// Params did not match the tool schema
    Validation,

    /// Circuit breaker refused the call
    CircuitOpen,

    /// Rate limiter refused the call
    RateLimited,

    /// Plugin raised an error or returned `success = false`
    Execution,

    /// Plugin did not finish before its deadline
    Timeout,

    /// Plugin panicked during execution
    Panicked,

    /// Orchestrator could not resolve a step's placeholders
    Resolution,
}

impl ToolErrorKind {
    /// Caller or configuration mistakes; never counted against the breaker
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::NotFound | ToolErrorKind::Disabled | ToolErrorKind::Validation
        )
    }

    /// Admission rejections; not new execution failures
    pub fn is_rejection(&self) -> bool {
        matches!(self, ToolErrorKind::CircuitOpen | ToolErrorKind::RateLimited)
    }

    /// Failures of an actual invocation; counted against the breaker
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Execution | ToolErrorKind::Timeout | ToolErrorKind::Panicked
        )
    }

    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ToolErrorKind::NotFound => "TOOL_NOT_FOUND",
            ToolErrorKind::Disabled => "TOOL_DISABLED",
            ToolErrorKind::Validation => "VALIDATION_FAILED",
            ToolErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ToolErrorKind::RateLimited => "RATE_LIMITED",
            ToolErrorKind::Execution => "EXECUTION_FAILED",
            ToolErrorKind::Timeout => "TIMEOUT",
            ToolErrorKind::Panicked => "PANICKED",
            ToolErrorKind::Resolution => "RESOLUTION_FAILED",
        }
    }
}

/// Structured tool error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    /// Error class
    pub kind: ToolErrorKind,

    /// Human-readable reason
    pub message: String,

    /// Machine-readable code (defaults to the kind's code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP-like status code reported by the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Suggested delay before retrying
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub retry_after: Option<Duration>,

    /// Additional context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    /// Create a new tool error
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: Some(kind.code().to_string()),
            status_code: None,
            retry_after: None,
            details: None,
        }
    }

    /// Override the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a status code
    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add retry delay
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Add context
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(tool_name: &str) -> Self {
        Self::new(
            ToolErrorKind::NotFound,
            format!("Tool '{}' is not registered", tool_name),
        )
    }

    pub fn disabled(tool_name: &str) -> Self {
        Self::new(
            ToolErrorKind::Disabled,
            format!("Tool '{}' is disabled", tool_name),
        )
    }

    /// Create a validation error from field errors
    pub fn validation(errors: Vec<ValidationError>) -> Self {
        Self {
            message: format!(
                "Validation failed: {}",
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            details: Some(serde_json::to_value(&errors).unwrap_or_default()),
            ..Self::new(ToolErrorKind::Validation, String::new())
        }
    }

    pub fn circuit_open(reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::CircuitOpen, reason)
    }

    pub fn rate_limited(reason: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RateLimited, reason)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Execution, message)
    }

    /// Create a timeout error
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Tool execution timed out after {:?}", duration),
        )
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Panicked, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Resolution, message)
    }

    /// Build the execution error describing a result the plugin marked failed
    pub fn from_failed_result(result: &ToolResult) -> Self {
        let message = result
            .error
            .clone()
            .or_else(|| result.message.clone())
            .unwrap_or_else(|| "Tool reported failure".to_string());
        let mut error = Self::execution(message);
        error.status_code = result.status_code();
        error
    }

    /// Status code of this error, falling back to a numeric `code`
    pub fn effective_status_code(&self) -> Option<u16> {
        self.status_code
            .or_else(|| self.code.as_deref().and_then(|c| c.parse().ok()))
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Field path (JSON pointer, `/` for the root)
    pub field: String,

    /// Error message
    pub message: String,

    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref code) = self.code {
            write!(f, "[{}] {}: {}", code, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Where a degraded answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradedSource {
    Cache,
}

/// Result of one executor call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Tool that was called
    pub tool_name: String,

    /// Whether the caller received usable data
    pub success: bool,

    /// Payload
    #[serde(default)]
    pub data: Value,

    /// Error for unsuccessful calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Tool metadata bag
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,

    /// Whether the answer was served from cache
    #[serde(default)]
    pub from_cache: bool,

    /// Wall-clock duration of the call
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// Whether a failure was masked by stale data
    #[serde(default)]
    pub degraded: bool,

    /// Source of the degraded answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_by: Option<DegradedSource>,

    /// The failure hidden behind a degraded answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked_error: Option<ToolError>,
}

impl ExecutionResult {
    /// Wrap a plugin result
    pub fn from_tool_result(
        tool_name: impl Into<String>,
        result: ToolResult,
        duration: Duration,
    ) -> Self {
        let error = (!result.success).then(|| ToolError::from_failed_result(&result));
        Self {
            tool_name: tool_name.into(),
            success: result.success,
            data: result.data,
            error,
            message: result.message,
            meta: result.meta,
            from_cache: false,
            duration,
            degraded: false,
            degraded_by: None,
            masked_error: None,
        }
    }

    /// Wrap a cached plugin result
    pub fn from_cache(tool_name: impl Into<String>, result: ToolResult, duration: Duration) -> Self {
        Self {
            from_cache: true,
            ..Self::from_tool_result(tool_name, result, duration)
        }
    }

    /// Serve a stale cached result in place of a failed call
    pub fn degraded(
        tool_name: impl Into<String>,
        stale: ToolResult,
        masked: ToolError,
        duration: Duration,
    ) -> Self {
        Self {
            degraded: true,
            degraded_by: Some(DegradedSource::Cache),
            masked_error: Some(masked),
            ..Self::from_cache(tool_name, stale, duration)
        }
    }

    /// A call that failed without producing a plugin result
    pub fn failure(tool_name: impl Into<String>, error: ToolError, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: Value::Null,
            message: Some(error.message.clone()),
            error: Some(error),
            meta: Map::new(),
            from_cache: false,
            duration,
            degraded: false,
            degraded_by: None,
            masked_error: None,
        }
    }

    /// Kind of the error, if the call failed
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// Serde helpers for Duration serialization as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_code_lookup() {
        let numeric = ToolResult::failure("upstream").with_status_code(503);
        assert_eq!(numeric.status_code(), Some(503));

        let textual = ToolResult::failure("upstream").with_meta("status", json!("429"));
        assert_eq!(textual.status_code(), Some(429));

        let none = ToolResult::failure("upstream").with_meta("status", json!("busy"));
        assert_eq!(none.status_code(), None);
    }

    #[test]
    fn test_error_kind_classes() {
        assert!(ToolErrorKind::NotFound.is_caller_error());
        assert!(ToolErrorKind::Validation.is_caller_error());
        assert!(ToolErrorKind::CircuitOpen.is_rejection());
        assert!(ToolErrorKind::RateLimited.is_rejection());
        assert!(ToolErrorKind::Timeout.is_execution_failure());
        assert!(ToolErrorKind::Panicked.is_execution_failure());
        assert!(!ToolErrorKind::Resolution.is_execution_failure());
        assert!(!ToolErrorKind::RateLimited.is_execution_failure());
    }

    #[test]
    fn test_failed_result_becomes_execution_error() {
        let result = ToolResult::failure("bad gateway").with_status_code(502);
        let execution = ExecutionResult::from_tool_result("search", result, Duration::ZERO);

        assert!(!execution.success);
        let error = execution.error.unwrap();
        assert_eq!(error.kind, ToolErrorKind::Execution);
        assert_eq!(error.status_code, Some(502));
        assert_eq!(error.message, "bad gateway");
    }

    #[test]
    fn test_numeric_code_counts_as_status() {
        let error = ToolError::execution("boom").with_code("500");
        assert_eq!(error.effective_status_code(), Some(500));
        assert_eq!(ToolError::execution("boom").effective_status_code(), None);
    }

    #[test]
    fn test_execution_result_wire_shape() {
        let stale = ToolResult::success(json!({"plans": []}));
        let result = ExecutionResult::degraded(
            "plan_list",
            stale,
            ToolError::timeout(Duration::from_secs(1)),
            Duration::from_millis(12),
        );

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["toolName"], "plan_list");
        assert_eq!(value["fromCache"], true);
        assert_eq!(value["degraded"], true);
        assert_eq!(value["degradedBy"], "cache");
        assert_eq!(value["duration"], 12);
        assert_eq!(value["maskedError"]["kind"], "timeout");
    }

    #[test]
    fn test_validation_error_message() {
        let error = ToolError::validation(vec![
            ValidationError::new("/query", "is required"),
            ValidationError::new("/limit", "must be positive").with_code("minimum"),
        ]);

        assert_eq!(error.kind, ToolErrorKind::Validation);
        assert!(error.message.contains("/query: is required"));
        assert!(error.message.contains("[minimum] /limit"));
        assert!(error.details.is_some());
    }
}
