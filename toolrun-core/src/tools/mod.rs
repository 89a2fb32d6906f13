//! Tool plugin contract and registration
//!
//! This module defines what a tool is as far as the runtime is concerned:
//! - The `ToolPlugin` trait and closure-backed `FnTool`
//! - Per-tool rate limit, cache, and circuit breaker configuration
//! - Result envelopes and the error taxonomy
//! - The `ToolRegistry` with per-tool metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use toolrun_core::tools::{FnTool, ToolMetadata, ToolRegistry, ToolResult, ToolSchema};
//!
//! let registry = ToolRegistry::new();
//! registry.register(
//!     FnTool::new(
//!         ToolMetadata::new("echo", "Echoes params back"),
//!         ToolSchema::any_object(),
//!         |params, _ctx| async move { Ok(ToolResult::success(params)) },
//!     )
//!     .into_plugin(),
//! );
//! ```

mod config;
mod context;
mod metrics;
mod plugin;
mod registry;
mod result;
mod schema;

pub use config::{
    BreakerStrategies, CacheConfig, CircuitBreakerConfig, DEFAULT_TRIP_STATUS_CODES,
    KeyStrategy, RateLimitConfig, StatusCodeStrategyConfig,
};
pub use context::ToolContext;
pub use metrics::{InFlightGuard, ToolMetrics, ToolMetricsSnapshot, ToolStatus};
pub use plugin::{BoxedPlugin, FnTool, ToolMetadata, ToolPlugin, ToolSchema};
pub use registry::{RegisteredTool, ToolRegistry, ToolSummary};
pub use result::{
    DegradedSource, ExecutionResult, ToolError, ToolErrorKind, ToolResult, ValidationError,
};
pub use schema::validate_params;

pub(crate) use result::duration_millis;
