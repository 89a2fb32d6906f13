//! Holder of the active circuit breaker implementation

use super::circuit_breaker::{CircuitBreaker, StrategyCircuitBreaker};
use crate::config::BreakerStrategyKind;
use std::sync::{Arc, PoisonError, RwLock};

/// Runtime container for the active [`CircuitBreaker`]
///
/// The executor asks the container for the breaker at the start of each call
/// and keeps using that instance for the whole call, so a swap never splits
/// one call across two implementations.
pub struct BreakerRuntime {
    active: RwLock<Arc<dyn CircuitBreaker>>,
}

impl std::fmt::Debug for BreakerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRuntime")
            .field("active", &self.circuit_breaker().name().to_string())
            .finish()
    }
}

impl Default for BreakerRuntime {
    fn default() -> Self {
        Self::new(Arc::new(StrategyCircuitBreaker::count_based()))
    }
}

impl BreakerRuntime {
    pub fn new(breaker: Arc<dyn CircuitBreaker>) -> Self {
        Self {
            active: RwLock::new(breaker),
        }
    }

    /// Container holding the built-in breaker for a configured strategy
    pub fn for_strategy(kind: BreakerStrategyKind) -> Self {
        let breaker = match kind {
            BreakerStrategyKind::Count => StrategyCircuitBreaker::count_based(),
            BreakerStrategyKind::StatusCode => StrategyCircuitBreaker::status_code_based(),
        };
        Self::new(Arc::new(breaker))
    }

    /// Currently active breaker
    pub fn circuit_breaker(&self) -> Arc<dyn CircuitBreaker> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the active breaker, destroying the previous one
    ///
    /// Breaker state does not carry over; every tool starts closed under the
    /// new implementation.
    pub fn set_circuit_breaker(&self, breaker: Arc<dyn CircuitBreaker>) -> Arc<dyn CircuitBreaker> {
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, breaker)
        };
        previous.destroy();
        tracing::info!(
            previous = %previous.name(),
            active = %self.circuit_breaker().name(),
            "Circuit breaker implementation swapped"
        );
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CircuitState, FailureContext};
    use crate::tools::{CircuitBreakerConfig, ToolError};

    #[tokio::test]
    async fn test_swap_replaces_state() {
        let runtime = BreakerRuntime::default();
        assert_eq!(runtime.circuit_breaker().name(), "count");

        let config = CircuitBreakerConfig::default().with_failure_threshold(1);
        let error = ToolError::execution("boom");
        runtime
            .circuit_breaker()
            .record_failure("search", &config, &FailureContext::from_error(&error));
        assert_eq!(runtime.circuit_breaker().get_state("search"), CircuitState::Open);

        let previous = runtime.set_circuit_breaker(Arc::new(StrategyCircuitBreaker::status_code_based()));
        assert_eq!(previous.name(), "count");
        assert_eq!(previous.get_state("search"), CircuitState::Closed);
        assert_eq!(runtime.circuit_breaker().name(), "status_code");
        assert_eq!(runtime.circuit_breaker().get_state("search"), CircuitState::Closed);
    }

    #[test]
    fn test_for_strategy() {
        let runtime = BreakerRuntime::for_strategy(BreakerStrategyKind::StatusCode);
        assert_eq!(runtime.circuit_breaker().name(), "status_code");
    }
}
