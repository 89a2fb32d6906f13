//! Policy-driven circuit breaker with timer-based recovery

use super::policy::{CountFailures, FailurePolicy, StatusCodeFailures};
use super::{Admission, BreakerStats, CircuitBreaker, CircuitState, FailureContext};
use crate::tools::CircuitBreakerConfig;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

type SharedRecord = Arc<Mutex<BreakerRecord>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct BreakerRecord {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure_time: Option<chrono::DateTime<Utc>>,
    last_success_time: Option<chrono::DateTime<Utc>>,
    opened_at: Option<chrono::DateTime<Utc>>,
    total_opens: u64,
    trial_in_flight: bool,
    /// When the open circuit becomes half-open
    half_open_at: Option<Instant>,
    timer: Option<AbortHandle>,
    /// Bumped whenever a pending timer is superseded
    generation: u64,
}

impl BreakerRecord {
    fn stats(&self) -> BreakerStats {
        BreakerStats {
            state: self.state,
            failures: self.failures,
            successes: self.successes,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
            opened_at: self.opened_at,
            total_opens: self.total_opens,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.half_open_at = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Lazy transition for circuits whose timer could not fire
    fn refresh(&mut self, tool: &str) {
        if self.state == CircuitState::Open
            && self.half_open_at.is_some_and(|at| Instant::now() >= at)
        {
            self.enter_half_open(tool);
        }
    }

    fn enter_half_open(&mut self, tool: &str) {
        self.cancel_timer();
        self.state = CircuitState::HalfOpen;
        self.trial_in_flight = false;
        tracing::info!(tool = %tool, "Circuit breaker half-open, next call tries the tool");
    }

    fn close(&mut self, tool: &str) {
        self.cancel_timer();
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
        self.trial_in_flight = false;
        tracing::info!(tool = %tool, "Circuit breaker closed");
    }

    fn open(&mut self, shared: &SharedRecord, tool: &str, reset_timeout: Duration) {
        let reopened = self.state == CircuitState::HalfOpen;
        self.state = CircuitState::Open;
        self.successes = 0;
        self.trial_in_flight = false;
        self.opened_at = Some(Utc::now());
        self.total_opens += 1;
        self.arm_timer(shared, tool, reset_timeout);

        tracing::warn!(
            tool = %tool,
            failures = self.failures,
            reset_timeout_ms = reset_timeout.as_millis() as u64,
            reopened,
            "Circuit breaker opened"
        );
    }

    fn arm_timer(&mut self, shared: &SharedRecord, tool: &str, delay: Duration) {
        self.cancel_timer();
        let deadline = Instant::now() + delay;
        self.half_open_at = Some(deadline);

        // Without a runtime the transition happens lazily in `refresh`
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let generation = self.generation;
        let record = Arc::downgrade(shared);
        let tool = tool.to_string();
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(record) = record.upgrade() {
                let mut rec = lock(&record);
                if rec.generation == generation && rec.state == CircuitState::Open {
                    rec.enter_half_open(&tool);
                }
            }
        });
        self.timer = Some(task.abort_handle());
    }
}

/// Circuit breaker whose failure counting is delegated to a [`FailurePolicy`]
///
/// Holds one record per tool. Opening a circuit arms a tokio timer that moves
/// it to half-open after `reset_timeout`.
pub struct StrategyCircuitBreaker {
    name: String,
    policy: Box<dyn FailurePolicy>,
    records: Mutex<HashMap<String, SharedRecord>>,
}

impl std::fmt::Debug for StrategyCircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyCircuitBreaker")
            .field("name", &self.name)
            .field("tools", &lock(&self.records).len())
            .finish()
    }
}

impl StrategyCircuitBreaker {
    /// Breaker that counts every failure
    pub fn count_based() -> Self {
        Self::with_policy(CountFailures)
    }

    /// Breaker that counts only failures carrying a trip status code
    pub fn status_code_based() -> Self {
        Self::with_policy(StatusCodeFailures::default())
    }

    pub fn with_policy(policy: impl FailurePolicy + 'static) -> Self {
        Self {
            name: policy.name().to_string(),
            policy: Box::new(policy),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, tool: &str) -> SharedRecord {
        lock(&self.records)
            .entry(tool.to_string())
            .or_default()
            .clone()
    }

    fn existing(&self, tool: &str) -> Option<SharedRecord> {
        lock(&self.records).get(tool).cloned()
    }
}

impl Default for StrategyCircuitBreaker {
    fn default() -> Self {
        Self::count_based()
    }
}

impl CircuitBreaker for StrategyCircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_execute(&self, tool: &str, config: &CircuitBreakerConfig) -> Admission {
        if !config.enabled {
            return Admission::allow(CircuitState::Closed);
        }

        let record = self.record(tool);
        let mut rec = lock(&record);
        rec.refresh(tool);

        match rec.state {
            CircuitState::Closed => Admission::allow(CircuitState::Closed),
            CircuitState::Open => {
                let retry_after = rec
                    .half_open_at
                    .map(|at| at.saturating_duration_since(Instant::now()))
                    .unwrap_or_default();
                Admission::reject(
                    CircuitState::Open,
                    format!(
                        "Circuit breaker is open for tool '{}' after {} failures; retry in {}ms",
                        tool,
                        rec.failures,
                        retry_after.as_millis()
                    ),
                )
                .with_retry_after(retry_after)
            }
            CircuitState::HalfOpen if rec.trial_in_flight => Admission::reject(
                CircuitState::HalfOpen,
                format!(
                    "Circuit breaker for tool '{}' is half-open and a trial call is in flight",
                    tool
                ),
            ),
            CircuitState::HalfOpen => {
                rec.trial_in_flight = true;
                Admission::allow(CircuitState::HalfOpen)
            }
        }
    }

    fn release_admission(&self, tool: &str) {
        if let Some(record) = self.existing(tool) {
            let mut rec = lock(&record);
            if rec.state == CircuitState::HalfOpen {
                rec.trial_in_flight = false;
            }
        }
    }

    fn record_success(&self, tool: &str, config: &CircuitBreakerConfig) {
        if !config.enabled {
            return;
        }

        let record = self.record(tool);
        let mut rec = lock(&record);
        rec.last_success_time = Some(Utc::now());

        match rec.state {
            CircuitState::Closed => {
                rec.failures = 0;
                rec.successes = rec.successes.saturating_add(1);
            }
            CircuitState::HalfOpen => rec.close(tool),
            // Late result of a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    fn record_failure(
        &self,
        tool: &str,
        config: &CircuitBreakerConfig,
        failure: &FailureContext<'_>,
    ) -> bool {
        if !config.enabled {
            return false;
        }

        let counted = self.policy.counts(failure, config);
        let record = self.record(tool);
        let mut rec = lock(&record);
        rec.last_failure_time = Some(Utc::now());

        if !counted {
            if rec.state == CircuitState::HalfOpen {
                rec.trial_in_flight = false;
            }
            tracing::debug!(
                tool = %tool,
                policy = %self.policy.name(),
                status_code = ?failure.status_code(),
                "Failure not counted by circuit breaker policy"
            );
            return false;
        }

        match rec.state {
            CircuitState::Closed => {
                rec.failures = rec.failures.saturating_add(1);
                if rec.failures >= config.failure_threshold.max(1) {
                    rec.open(&record, tool, config.reset_timeout);
                }
            }
            CircuitState::HalfOpen => {
                rec.failures = rec.failures.saturating_add(1);
                rec.open(&record, tool, config.reset_timeout);
            }
            CircuitState::Open => {}
        }
        true
    }

    fn get_state(&self, tool: &str) -> CircuitState {
        match self.existing(tool) {
            Some(record) => {
                let mut rec = lock(&record);
                rec.refresh(tool);
                rec.state
            }
            None => CircuitState::Closed,
        }
    }

    fn get_stats(&self, tool: &str) -> BreakerStats {
        match self.existing(tool) {
            Some(record) => {
                let mut rec = lock(&record);
                rec.refresh(tool);
                rec.stats()
            }
            None => BreakerStats::default(),
        }
    }

    fn reset(&self, tool: &str) {
        if let Some(record) = self.existing(tool) {
            let mut rec = lock(&record);
            rec.cancel_timer();
            let generation = rec.generation;
            *rec = BreakerRecord {
                generation,
                ..Default::default()
            };
            tracing::info!(tool = %tool, "Circuit breaker reset");
        }
    }

    fn remove(&self, tool: &str) {
        let removed = lock(&self.records).remove(tool);
        if let Some(record) = removed {
            lock(&record).cancel_timer();
        }
    }

    fn destroy(&self) {
        let records: Vec<SharedRecord> = lock(&self.records).drain().map(|(_, r)| r).collect();
        for record in &records {
            lock(record).cancel_timer();
        }
        tracing::debug!(breaker = %self.name, tools = records.len(), "Circuit breaker destroyed");
    }
}

impl Drop for StrategyCircuitBreaker {
    fn drop(&mut self) {
        for record in lock(&self.records).values() {
            lock(record).cancel_timer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolError, ToolResult};

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(3)
            .with_reset_timeout(Duration::from_secs(30))
    }

    fn fail(breaker: &StrategyCircuitBreaker, tool: &str, config: &CircuitBreakerConfig) -> bool {
        let error = ToolError::execution("boom");
        breaker.record_failure(tool, config, &FailureContext::from_error(&error))
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config();

        for _ in 0..2 {
            fail(&breaker, "search", &config);
        }
        assert_eq!(breaker.get_state("search"), CircuitState::Closed);

        fail(&breaker, "search", &config);
        assert_eq!(breaker.get_state("search"), CircuitState::Open);

        let admission = breaker.can_execute("search", &config);
        assert!(!admission.allowed);
        assert!(admission.reason.unwrap().contains("open"));
        assert_eq!(admission.retry_after, Some(Duration::from_secs(30)));

        sleep_ms(29_000).await;
        assert!(!breaker.can_execute("search", &config).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_moves_to_half_open_with_single_trial() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config();
        for _ in 0..3 {
            fail(&breaker, "search", &config);
        }

        sleep_ms(30_001).await;
        assert_eq!(breaker.get_state("search"), CircuitState::HalfOpen);

        let trial = breaker.can_execute("search", &config);
        assert!(trial.allowed);
        assert_eq!(trial.state, CircuitState::HalfOpen);
        assert!(!breaker.can_execute("search", &config).allowed);

        breaker.record_success("search", &config);
        let stats = breaker.get_stats("search");
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.successes, 0);
        assert_eq!(stats.total_opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_restarts_timer() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config();
        for _ in 0..3 {
            fail(&breaker, "search", &config);
        }
        sleep_ms(30_001).await;
        assert!(breaker.can_execute("search", &config).allowed);

        fail(&breaker, "search", &config);
        assert_eq!(breaker.get_state("search"), CircuitState::Open);

        sleep_ms(20_000).await;
        assert_eq!(breaker.get_state("search"), CircuitState::Open);

        sleep_ms(10_001).await;
        assert_eq!(breaker.get_state("search"), CircuitState::HalfOpen);
        assert_eq!(breaker.get_stats("search").total_opens, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_admission_can_be_claimed_again() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config().with_failure_threshold(1);
        fail(&breaker, "search", &config);
        sleep_ms(30_001).await;

        assert!(breaker.can_execute("search", &config).allowed);
        breaker.release_admission("search");
        assert!(breaker.can_execute("search", &config).allowed);
    }

    #[tokio::test]
    async fn test_success_while_closed_resets_failures() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config();

        fail(&breaker, "search", &config);
        fail(&breaker, "search", &config);
        breaker.record_success("search", &config);
        fail(&breaker, "search", &config);
        fail(&breaker, "search", &config);

        assert_eq!(breaker.get_state("search"), CircuitState::Closed);
        assert_eq!(breaker.get_stats("search").failures, 2);
    }

    #[tokio::test]
    async fn test_status_code_strategy_ignores_other_codes() {
        let breaker = StrategyCircuitBreaker::status_code_based();
        let config = config();
        let not_found = ToolResult::failure("missing").with_status_code(404);
        let unavailable = ToolResult::failure("down").with_status_code(503);

        for _ in 0..5 {
            let error = ToolError::from_failed_result(&not_found);
            let counted = breaker.record_failure(
                "search",
                &config,
                &FailureContext::new(Some(&error), Some(&not_found)),
            );
            assert!(!counted);
        }
        assert_eq!(breaker.get_state("search"), CircuitState::Closed);
        assert_eq!(breaker.get_stats("search").failures, 0);

        for _ in 0..3 {
            breaker.record_failure("search", &config, &FailureContext::new(None, Some(&unavailable)));
        }
        assert_eq!(breaker.get_state("search"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_disabled_config_never_trips() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = CircuitBreakerConfig::disabled();

        for _ in 0..10 {
            assert!(!fail(&breaker, "search", &config));
        }
        assert!(breaker.can_execute("search", &config).allowed);
        assert_eq!(breaker.get_state("search"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_and_destroy() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config().with_failure_threshold(1);

        fail(&breaker, "a", &config);
        fail(&breaker, "b", &config);
        breaker.reset("a");
        assert_eq!(breaker.get_state("a"), CircuitState::Closed);
        assert_eq!(breaker.get_state("b"), CircuitState::Open);

        breaker.destroy();
        assert_eq!(breaker.get_state("b"), CircuitState::Closed);
    }

    #[test]
    fn test_lazy_half_open_without_runtime() {
        let breaker = StrategyCircuitBreaker::count_based();
        let config = config()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::from_millis(10));

        fail(&breaker, "search", &config);
        assert_eq!(breaker.get_state("search"), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.can_execute("search", &config).allowed);
        assert_eq!(breaker.get_state("search"), CircuitState::HalfOpen);
    }
}
