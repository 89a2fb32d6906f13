//! Per-tool admission, caching, and failure-isolation configuration
//!
//! These are declared by plugins and consulted by the executor on every call.
//! Durations accept humantime strings (`"30s"`, `"500ms"`) when deserialized.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status codes the status-code strategy reacts to by default
pub const DEFAULT_TRIP_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Maximum concurrent executions
    #[serde(default, alias = "max_concurrent")]
    pub max_concurrent: Option<usize>,

    /// Maximum admitted calls per minute
    #[serde(default, alias = "max_per_minute")]
    pub max_per_minute: Option<u64>,

    /// Invocation deadline
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl RateLimitConfig {
    /// Create an empty config (no limits, no deadline)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent executions
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = Some(max);
        self
    }

    /// Set maximum calls per minute
    pub fn with_max_per_minute(mut self, max: u64) -> Self {
        self.max_per_minute = Some(max);
        self
    }

    /// Set the invocation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a cache key is derived from a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Tool name only; every caller shares one entry
    Global,
    /// Tool name, user ID, and params hash
    User,
    /// Tool name and params hash
    #[default]
    Params,
}

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Whether results are cached
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time-to-live of a cached result
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Key derivation strategy
    #[serde(default, alias = "key_strategy")]
    pub key_strategy: KeyStrategy,

    /// How long past expiry a stale entry may still be served in place of a
    /// failed live call. `None` disables degraded responses for the tool.
    #[serde(default, alias = "stale_if_error", with = "humantime_serde")]
    pub stale_if_error: Option<Duration>,
}

impl CacheConfig {
    /// Create an enabled cache config with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            key_strategy: KeyStrategy::default(),
            stale_if_error: None,
        }
    }

    /// Set key strategy
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// Allow serving stale entries up to `window` past expiry on failure
    pub fn with_stale_if_error(mut self, window: Duration) -> Self {
        self.stale_if_error = Some(window);
        self
    }

    /// Disable caching
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Configuration of the status-code strategy for one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodeStrategyConfig {
    /// Whether the status-code filter applies
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Status codes that count as breaker failures
    #[serde(default = "default_trip_codes")]
    pub codes: Vec<u16>,
}

impl Default for StatusCodeStrategyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            codes: DEFAULT_TRIP_STATUS_CODES.to_vec(),
        }
    }
}

/// Nested per-strategy configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStrategies {
    /// Status-code strategy settings
    #[serde(default, alias = "status_code", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCodeStrategyConfig>,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Whether the breaker guards this tool
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Counted failures before the circuit opens
    #[serde(default = "default_failure_threshold", alias = "failure_threshold")]
    pub failure_threshold: u32,

    /// Time spent open before a trial call is allowed
    #[serde(
        default = "default_reset_timeout",
        alias = "reset_timeout",
        with = "humantime_serde"
    )]
    pub reset_timeout: Duration,

    /// Strategy-specific settings
    #[serde(default)]
    pub strategies: BreakerStrategies,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            strategies: BreakerStrategies::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config that never trips
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set reset timeout
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Builder: set the status codes that count as failures
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.strategies.status_code = Some(StatusCodeStrategyConfig {
            enabled: true,
            codes: codes.into_iter().collect(),
        });
        self
    }
}

fn default_true() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_trip_codes() -> Vec<u16> {
    DEFAULT_TRIP_STATUS_CODES.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_config_builders() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .with_reset_timeout(Duration::from_secs(5))
            .with_status_codes([503]);

        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.reset_timeout, Duration::from_secs(5));
        assert_eq!(config.strategies.status_code.unwrap().codes, vec![503]);
    }

    #[test]
    fn test_configs_deserialize_from_documents() {
        let cache: CacheConfig = serde_json::from_value(serde_json::json!({
            "ttl": "90s",
            "keyStrategy": "user",
            "staleIfError": "5m"
        }))
        .unwrap();
        assert!(cache.enabled);
        assert_eq!(cache.ttl, Duration::from_secs(90));
        assert_eq!(cache.key_strategy, KeyStrategy::User);
        assert_eq!(cache.stale_if_error, Some(Duration::from_secs(300)));

        let breaker: CircuitBreakerConfig = serde_json::from_value(serde_json::json!({
            "failure_threshold": 2,
            "reset_timeout": "10s",
            "strategies": { "status_code": { "codes": [500] } }
        }))
        .unwrap();
        assert_eq!(breaker.failure_threshold, 2);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(10));
        assert_eq!(breaker.strategies.status_code.unwrap().codes, vec![500]);

        let limits: RateLimitConfig = serde_json::from_value(serde_json::json!({
            "maxConcurrent": 2,
            "timeout": "250ms"
        }))
        .unwrap();
        assert_eq!(limits.max_concurrent, Some(2));
        assert_eq!(limits.max_per_minute, None);
        assert_eq!(limits.timeout, Some(Duration::from_millis(250)));
    }
}
