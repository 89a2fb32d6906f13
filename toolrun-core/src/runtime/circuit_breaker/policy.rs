//! Failure policies: which failures a breaker counts

use super::FailureContext;
use crate::tools::{CircuitBreakerConfig, DEFAULT_TRIP_STATUS_CODES};

/// Decides whether a failure counts towards opening the circuit
pub trait FailurePolicy: Send + Sync {
    fn name(&self) -> &str;

    fn counts(&self, failure: &FailureContext<'_>, config: &CircuitBreakerConfig) -> bool;
}

/// Counts every failure
#[derive(Debug, Clone, Copy, Default)]
pub struct CountFailures;

impl FailurePolicy for CountFailures {
    fn name(&self) -> &str {
        "count"
    }

    fn counts(&self, _failure: &FailureContext<'_>, _config: &CircuitBreakerConfig) -> bool {
        true
    }
}

/// Counts only failures whose status code is in a configured set
///
/// The per-tool `strategies.status_code.codes` override the policy's own
/// codes. Failures without a status code are ignored. A tool that disables
/// its status-code sub-config falls back to counting every failure.
#[derive(Debug, Clone)]
pub struct StatusCodeFailures {
    codes: Vec<u16>,
}

impl Default for StatusCodeFailures {
    fn default() -> Self {
        Self {
            codes: DEFAULT_TRIP_STATUS_CODES.to_vec(),
        }
    }
}

impl StatusCodeFailures {
    pub fn new(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }
}

impl FailurePolicy for StatusCodeFailures {
    fn name(&self) -> &str {
        "status_code"
    }

    fn counts(&self, failure: &FailureContext<'_>, config: &CircuitBreakerConfig) -> bool {
        let codes = match &config.strategies.status_code {
            Some(sub) if !sub.enabled => return true,
            Some(sub) => &sub.codes,
            None => &self.codes,
        };
        failure
            .status_code()
            .is_some_and(|code| codes.contains(&code))
    }
}

/// Counts a failure if any inner policy does
pub struct AnyOf {
    name: String,
    policies: Vec<Box<dyn FailurePolicy>>,
}

impl AnyOf {
    pub fn new(policies: Vec<Box<dyn FailurePolicy>>) -> Self {
        let name = policies
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, policies }
    }
}

impl FailurePolicy for AnyOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn counts(&self, failure: &FailureContext<'_>, config: &CircuitBreakerConfig) -> bool {
        self.policies.iter().any(|p| p.counts(failure, config))
    }
}
