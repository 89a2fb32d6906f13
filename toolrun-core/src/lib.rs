//! # Toolrun - In-process tool execution runtime
//!
//! Toolrun lets an agent invoke named tools through one uniform contract
//! while the runtime applies, per tool:
//! - Parameter validation against a JSON Schema
//! - Concurrency and per-minute rate limits
//! - Circuit breaking with pluggable failure strategies
//! - Result caching, with stale answers served when a call fails
//! - Latency and outcome metrics
//!
//! On top of the executor sit protocol adapters that normalize upstream
//! tool-call formats, and an orchestrator for multi-step plans.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolrun_core::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
//!     executor.register(
//!         FnTool::new(
//!             ToolMetadata::new("echo", "Echoes params back"),
//!             ToolSchema::any_object(),
//!             |params, _ctx| async move { Ok(ToolResult::success(params)) },
//!         )
//!         .into_plugin(),
//!     );
//!
//!     let result = executor
//!         .execute("echo", json!({"hello": "world"}), &ToolContext::new("user-1"))
//!         .await;
//!     assert!(result.success);
//!     Ok(())
//! }
//! ```
//!
//! ## Call pipeline
//!
//! Every `execute` runs the same stages: lookup, validation, circuit check,
//! rate limit, cache lookup, invocation under a deadline, then
//! bookkeeping (breaker, metrics, cache write). Caller errors never touch
//! breaker state, and a misbehaving tool degrades to rejections or cached
//! data instead of failing the host.

pub mod config;
pub mod error;
pub mod orchestration;
pub mod protocol;
pub mod runtime;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        BreakerStrategyKind, CacheSettings, CircuitBreakerSettings, ExecutorConfig,
        OrchestratorConfig, ToolrunConfig,
    };
    pub use crate::error::{Result, RuntimeError};
    pub use crate::orchestration::{
        OnFailure, OrchestrationError, OrchestrationPlan, OrchestrationResult, Orchestrator,
        PlanStep, ResolutionError, StepResult, StepStatus,
    };
    pub use crate::protocol::{
        NormalizedToolCall, ProtocolAdapter, ProtocolError, ProtocolRegistry, TextResult,
    };
    pub use crate::runtime::{
        BreakerRuntime, CacheManager, CircuitBreaker, CircuitState, ExecuteOptions,
        RateLimiter, StrategyCircuitBreaker, ToolExecutor,
    };
    pub use crate::tools::{
        CacheConfig, CircuitBreakerConfig, ExecutionResult, FnTool, KeyStrategy,
        RateLimitConfig, ToolContext, ToolError, ToolErrorKind, ToolMetadata,
        ToolMetricsSnapshot, ToolPlugin, ToolRegistry, ToolResult, ToolSchema,
    };
}
