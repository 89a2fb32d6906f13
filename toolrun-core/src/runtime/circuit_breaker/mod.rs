//! Circuit breaker pattern for tool calls
//!
//! Prevents repeated calls to a failing tool by tracking counted failures per
//! tool and temporarily rejecting calls once a threshold is exceeded.
//!
//! States:
//! - `Closed`: calls pass through
//! - `Open`: calls are rejected until the reset timer elapses
//! - `HalfOpen`: exactly one trial call is allowed
//!
//! Which failures count is decided by a [`FailurePolicy`]; the state machine
//! itself lives in [`StrategyCircuitBreaker`]. The executor only talks to the
//! [`CircuitBreaker`] trait, so the active implementation can be swapped in
//! the runtime container.

mod policy;
mod strategy;

pub use policy::{AnyOf, CountFailures, FailurePolicy, StatusCodeFailures};
pub use strategy::StrategyCircuitBreaker;

use crate::tools::{CircuitBreakerConfig, ToolError, ToolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls pass through
    #[default]
    Closed,
    /// Circuit open - calls are rejected
    Open,
    /// Testing if the tool recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Answer to `can_execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub state: CircuitState,
    /// Why the call was refused
    pub reason: Option<String>,
    /// Time until the breaker will admit a trial call
    pub retry_after: Option<Duration>,
}

impl Admission {
    pub fn allow(state: CircuitState) -> Self {
        Self {
            allowed: true,
            state,
            reason: None,
            retry_after: None,
        }
    }

    pub fn reject(state: CircuitState, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            state,
            reason: Some(reason.into()),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// What a failed call left behind, for policies to inspect
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureContext<'a> {
    pub error: Option<&'a ToolError>,
    pub result: Option<&'a ToolResult>,
}

impl<'a> FailureContext<'a> {
    pub fn new(error: Option<&'a ToolError>, result: Option<&'a ToolResult>) -> Self {
        Self { error, result }
    }

    pub fn from_error(error: &'a ToolError) -> Self {
        Self {
            error: Some(error),
            result: None,
        }
    }

    /// HTTP-like status code of the failure, if one was reported
    pub fn status_code(&self) -> Option<u16> {
        self.error
            .and_then(ToolError::effective_status_code)
            .or_else(|| self.result.and_then(ToolResult::status_code))
    }
}

/// Read-only view of one tool's breaker record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    /// How many times the circuit has opened
    pub total_opens: u64,
}

/// Per-tool failure isolation
///
/// Every method takes the tool name; implementations keep one record per
/// tool and must make each transition atomic. The config is passed on each
/// call so re-registered plugins take effect immediately.
pub trait CircuitBreaker: Send + Sync {
    /// Strategy name, for logs and introspection
    fn name(&self) -> &str;

    /// Decide whether a call may proceed
    ///
    /// In half-open this claims the single trial slot; a caller that was
    /// admitted but never invokes the tool must call `release_admission`.
    fn can_execute(&self, tool: &str, config: &CircuitBreakerConfig) -> Admission;

    /// Give back a trial slot that was claimed but not used
    fn release_admission(&self, tool: &str);

    fn record_success(&self, tool: &str, config: &CircuitBreakerConfig);

    /// Record a failed invocation; returns whether it was counted
    fn record_failure(
        &self,
        tool: &str,
        config: &CircuitBreakerConfig,
        failure: &FailureContext<'_>,
    ) -> bool;

    fn get_state(&self, tool: &str) -> CircuitState;

    fn get_stats(&self, tool: &str) -> BreakerStats;

    /// Close the circuit and clear counters
    fn reset(&self, tool: &str);

    /// Forget the tool entirely
    fn remove(&self, tool: &str);

    /// Cancel every pending timer
    fn destroy(&self);
}
