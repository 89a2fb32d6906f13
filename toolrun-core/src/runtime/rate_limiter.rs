//! Per-tool admission control
//!
//! Two independent limits per tool:
//! - a concurrency gauge backed by a tokio semaphore; the slot is held by a
//!   [`RatePermit`] and returned when the permit drops, so it is released on
//!   success, failure, timeout, and cache hits alike
//! - a fixed one-minute window counter of admitted calls

use crate::tools::RateLimitConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Length of the per-minute window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Why a call was not admitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitRejection {
    #[error("Rate limit exceeded: {limit} concurrent executions already running")]
    Concurrency { limit: usize },

    #[error("Rate limit exceeded: {limit} calls per minute, window resets in {}ms", retry_after.as_millis())]
    PerMinute { limit: u64, retry_after: Duration },
}

impl RateLimitRejection {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitRejection::Concurrency { .. } => None,
            RateLimitRejection::PerMinute { retry_after, .. } => Some(*retry_after),
        }
    }
}

/// Holds a concurrency slot until dropped
#[derive(Debug)]
pub struct RatePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

struct LimiterState {
    max_concurrent: Option<usize>,
    semaphore: Option<Arc<Semaphore>>,
    window_start: Instant,
    window_count: u64,
}

impl LimiterState {
    fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            max_concurrent,
            semaphore: max_concurrent.map(|limit| Arc::new(Semaphore::new(limit))),
            window_start: Instant::now(),
            window_count: 0,
        }
    }
}

/// Admission counters keyed by tool name
#[derive(Default)]
pub struct RateLimiter {
    tools: Mutex<HashMap<String, LimiterState>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tools", &self.lock().len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LimiterState>> {
        self.tools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a call or say why not
    ///
    /// Checks and counter updates happen under one lock, so two racing calls
    /// can never both take the last slot.
    pub fn try_acquire(
        &self,
        tool: &str,
        config: &RateLimitConfig,
    ) -> Result<RatePermit, RateLimitRejection> {
        let mut tools = self.lock();
        let state = tools
            .entry(tool.to_string())
            .or_insert_with(|| LimiterState::new(config.max_concurrent));

        // A re-registered plugin may declare a different limit
        if state.max_concurrent != config.max_concurrent {
            state.max_concurrent = config.max_concurrent;
            state.semaphore = config
                .max_concurrent
                .map(|limit| Arc::new(Semaphore::new(limit)));
        }

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.window_start);
        if elapsed >= RATE_WINDOW {
            state.window_start = now;
            state.window_count = 0;
        }

        if let Some(limit) = config.max_per_minute
            && state.window_count >= limit
        {
            let retry_after = RATE_WINDOW.saturating_sub(now.saturating_duration_since(state.window_start));
            return Err(RateLimitRejection::PerMinute { limit, retry_after });
        }

        let slot = match (&state.semaphore, state.max_concurrent) {
            (Some(semaphore), Some(limit)) => Some(
                semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| RateLimitRejection::Concurrency { limit })?,
            ),
            _ => None,
        };

        state.window_count += 1;
        Ok(RatePermit { _slot: slot })
    }

    /// Slots currently held for a tool with a concurrency limit
    pub fn concurrent(&self, tool: &str) -> usize {
        self.lock()
            .get(tool)
            .and_then(|state| {
                let semaphore = state.semaphore.as_ref()?;
                let limit = state.max_concurrent?;
                Some(limit.saturating_sub(semaphore.available_permits()))
            })
            .unwrap_or(0)
    }

    /// Calls admitted in the current window
    pub fn window_count(&self, tool: &str) -> u64 {
        self.lock()
            .get(tool)
            .map(|state| state.window_count)
            .unwrap_or(0)
    }

    /// Clear the per-minute window; held slots stay held
    pub fn reset(&self, tool: &str) {
        if let Some(state) = self.lock().get_mut(tool) {
            state.window_start = Instant::now();
            state.window_count = 0;
        }
    }

    pub fn reset_all(&self) {
        let now = Instant::now();
        for state in self.lock().values_mut() {
            state.window_start = now;
            state.window_count = 0;
        }
    }

    pub fn remove(&self, tool: &str) {
        self.lock().remove(tool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrency_limit_and_release() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().with_max_concurrent(2);

        let first = limiter.try_acquire("search", &config).unwrap();
        let _second = limiter.try_acquire("search", &config).unwrap();
        assert_eq!(limiter.concurrent("search"), 2);

        let rejected = limiter.try_acquire("search", &config).unwrap_err();
        assert_eq!(rejected, RateLimitRejection::Concurrency { limit: 2 });
        assert!(rejected.to_string().contains("Rate limit exceeded"));

        drop(first);
        assert_eq!(limiter.concurrent("search"), 1);
        assert!(limiter.try_acquire("search", &config).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_window() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().with_max_per_minute(2);

        assert!(limiter.try_acquire("search", &config).is_ok());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(limiter.try_acquire("search", &config).is_ok());

        let rejected = limiter.try_acquire("search", &config).unwrap_err();
        assert_eq!(rejected.retry_after(), Some(Duration::from_secs(40)));

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(limiter.try_acquire("search", &config).is_ok());
        assert_eq!(limiter.window_count("search"), 1);
    }

    #[tokio::test]
    async fn test_rejected_call_does_not_consume_window() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new()
            .with_max_concurrent(1)
            .with_max_per_minute(10);

        let _held = limiter.try_acquire("search", &config).unwrap();
        assert!(limiter.try_acquire("search", &config).is_err());
        assert_eq!(limiter.window_count("search"), 1);
    }

    #[tokio::test]
    async fn test_tools_are_independent() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new().with_max_concurrent(1);

        let _a = limiter.try_acquire("a", &config).unwrap();
        assert!(limiter.try_acquire("b", &config).is_ok());
        assert!(limiter.try_acquire("a", &config).is_err());
    }

    #[tokio::test]
    async fn test_unlimited_config_always_admits() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::new();
        let permits: Vec<_> = (0..100)
            .map(|_| limiter.try_acquire("a", &config).unwrap())
            .collect();
        assert_eq!(permits.len(), 100);
        assert_eq!(limiter.concurrent("a"), 0);
    }
}
