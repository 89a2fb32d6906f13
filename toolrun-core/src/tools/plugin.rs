//! Plugin contract and metadata definitions
//!
//! A plugin is a named capability the runtime can invoke. It declares its
//! metadata, the shape of the params it accepts, and optional admission,
//! caching, and circuit-breaker settings. What the plugin does inside
//! `execute` is entirely its own business.

use super::config::{CacheConfig, CircuitBreakerConfig, RateLimitConfig};
use super::context::ToolContext;
use super::result::{ToolError, ToolResult, ValidationError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Tool metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Tool version
    pub version: String,

    /// Whether the tool accepts calls
    pub enabled: bool,

    /// Tags for categorization
    pub tags: Vec<String>,
}

impl ToolMetadata {
    /// Create new metadata with required fields
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: "0.1.0".to_string(),
            enabled: true,
            tags: Vec::new(),
        }
    }

    /// Set version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Mark the tool as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// JSON Schema for tool parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// JSON Schema for input parameters
    pub parameters: Value,
}

impl ToolSchema {
    /// Create a schema from a JSON Schema value
    pub fn new(parameters: Value) -> Self {
        Self { parameters }
    }

    /// Create an empty schema (tool takes no parameters)
    pub fn empty() -> Self {
        Self {
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    /// Accept any JSON object
    pub fn any_object() -> Self {
        Self {
            parameters: serde_json::json!({ "type": "object" }),
        }
    }

    /// Validate params against this schema
    pub fn validate(&self, params: &Value) -> Result<(), Vec<ValidationError>> {
        super::schema::validate_params(&self.parameters, params)
    }
}

/// Core plugin trait
///
/// Implement this trait to expose a capability through the runtime. The
/// executor validates params, applies admission control and caching, and only
/// then calls `execute`.
///
/// Returning `Err` and returning `Ok` with `success = false` are both
/// execution failures as far as the runtime is concerned.
#[async_trait]
pub trait ToolPlugin: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> &ToolMetadata;

    /// Get tool name (convenience method)
    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Get the JSON schema for this tool's parameters
    fn schema(&self) -> ToolSchema;

    /// Admission limits and invocation deadline
    fn rate_limit(&self) -> Option<RateLimitConfig> {
        None
    }

    /// Result caching
    fn cache(&self) -> Option<CacheConfig> {
        None
    }

    /// Failure isolation; `None` uses the runtime default
    fn circuit_breaker(&self) -> Option<CircuitBreakerConfig> {
        None
    }

    /// Execute the tool
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError>;
}

/// Type alias for shared plugins
pub type BoxedPlugin = Arc<dyn ToolPlugin>;

type Handler =
    Arc<dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolResult, ToolError>> + Send + Sync>;

/// Closure-backed plugin
///
/// ```rust,ignore
/// let echo = FnTool::new(
///     ToolMetadata::new("echo", "Echoes params back"),
///     ToolSchema::any_object(),
///     |params, _ctx| async move { Ok(ToolResult::success(params)) },
/// );
/// ```
pub struct FnTool {
    metadata: ToolMetadata,
    schema: ToolSchema,
    rate_limit: Option<RateLimitConfig>,
    cache: Option<CacheConfig>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    handler: Handler,
}

impl FnTool {
    /// Create a new closure-backed tool
    pub fn new<F, Fut>(metadata: ToolMetadata, schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            metadata,
            schema,
            rate_limit: None,
            cache: None,
            circuit_breaker: None,
            handler: Arc::new(move |params, ctx| Box::pin(handler(params, ctx))),
        }
    }

    /// Set rate limits
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Set cache config
    pub fn with_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Set circuit breaker config
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Wrap into a shared plugin
    pub fn into_plugin(self) -> BoxedPlugin {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.metadata.name)
            .field("rate_limit", &self.rate_limit)
            .field("cache", &self.cache)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}

#[async_trait]
impl ToolPlugin for FnTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn rate_limit(&self) -> Option<RateLimitConfig> {
        self.rate_limit.clone()
    }

    fn cache(&self) -> Option<CacheConfig> {
        self.cache.clone()
    }

    fn circuit_breaker(&self) -> Option<CircuitBreakerConfig> {
        self.circuit_breaker.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        (self.handler)(params, ctx.clone()).await
    }
}
