//! Execution runtime
//!
//! The per-tool state holders (`RateLimiter`, `CacheManager`, circuit
//! breaker) and the `ToolExecutor` that composes them into one call pipeline.

mod cache;
mod circuit_breaker;
mod container;
mod executor;
mod rate_limiter;

pub use cache::{CacheKey, CacheManager};
pub use circuit_breaker::{
    Admission, AnyOf, BreakerStats, CircuitBreaker, CircuitState, CountFailures, FailureContext,
    FailurePolicy, StatusCodeFailures, StrategyCircuitBreaker,
};
pub use container::BreakerRuntime;
pub use executor::{ExecuteOptions, ToolExecutor};
pub use rate_limiter::{RATE_WINDOW, RateLimitRejection, RateLimiter, RatePermit};
