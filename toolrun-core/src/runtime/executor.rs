//! Tool executor: the call pipeline
//!
//! Every call runs through the same stages, each of which may short-circuit:
//!
//! 1. lookup (unknown or disabled tool)
//! 2. parameter validation against the plugin schema
//! 3. circuit check
//! 4. rate check
//! 5. cache lookup
//! 6. invocation under a deadline
//! 7. outcome recording (breaker, cache, metrics)
//! 8. degraded fallback to a stale cache entry
//!
//! Stages 1 to 5 never suspend. Only the invocation awaits the plugin, which
//! runs in its own tokio task so a panicking plugin becomes an execution
//! failure instead of taking the caller down.

use super::cache::{CacheKey, CacheManager};
use super::circuit_breaker::{CircuitBreaker, CircuitState, FailureContext};
use super::container::BreakerRuntime;
use super::rate_limiter::RateLimiter;
use crate::config::{ExecutorConfig, ToolrunConfig};
use crate::tools::{
    CircuitBreakerConfig, ExecutionResult, RegisteredTool, ToolContext, ToolError, ToolErrorKind,
    ToolMetrics, ToolMetricsSnapshot, ToolPlugin, ToolRegistry, ToolResult, ToolStatus,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Per-call options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Skip the cache lookup (the result is still written back)
    pub bypass_cache: bool,

    /// Deadline overriding the plugin's `rate_limit.timeout`
    pub timeout: Option<Duration>,

    /// Allow stale cache entries in place of failures
    pub allow_degraded: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            bypass_cache: false,
            timeout: None,
            allow_degraded: true,
        }
    }
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_degraded(mut self) -> Self {
        self.allow_degraded = false;
        self
    }
}

/// Composes registry, rate limiter, cache, and circuit breaker into one
/// call pipeline
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    rate_limiter: RateLimiter,
    cache: Arc<CacheManager>,
    runtime: Arc<BreakerRuntime>,
    config: ExecutorConfig,
    default_breaker: CircuitBreakerConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("runtime", &self.runtime)
            .field("config", &self.config)
            .finish()
    }
}

impl ToolExecutor {
    /// Executor with default settings over the given registry
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            rate_limiter: RateLimiter::new(),
            cache: Arc::new(CacheManager::new()),
            runtime: Arc::new(BreakerRuntime::default()),
            config: ExecutorConfig::default(),
            default_breaker: CircuitBreakerConfig::default(),
            sweeper: Mutex::new(None),
        }
    }

    /// Executor wired from loaded configuration
    ///
    /// Starts the cache sweeper when `cache.sweep_interval` is set and a tokio
    /// runtime is available.
    pub fn from_config(registry: Arc<ToolRegistry>, config: &ToolrunConfig) -> Self {
        let cache = CacheManager::new().with_default_stale_if_error(config.cache.default_stale_if_error);
        let executor = Self::new(registry)
            .with_runtime(Arc::new(BreakerRuntime::for_strategy(
                config.circuit_breaker.strategy,
            )))
            .with_cache(Arc::new(cache))
            .with_config(config.executor.clone())
            .with_default_circuit_breaker(config.circuit_breaker.default.clone());

        if let Some(interval) = config.cache.sweep_interval {
            executor.start_cache_sweeper(interval);
        }
        executor
    }

    pub fn with_runtime(mut self, runtime: Arc<BreakerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Breaker config for plugins that declare none
    pub fn with_default_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.default_breaker = config;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn runtime(&self) -> &Arc<BreakerRuntime> {
        &self.runtime
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn breaker_config(&self, plugin: &dyn ToolPlugin) -> CircuitBreakerConfig {
        plugin
            .circuit_breaker()
            .unwrap_or_else(|| self.default_breaker.clone())
    }

    /// Register a plugin; returns whether an existing one was replaced
    ///
    /// A replaced plugin's cached results are dropped.
    pub fn register(&self, plugin: Arc<dyn ToolPlugin>) -> bool {
        let name = plugin.name().to_string();
        match plugin.cache() {
            Some(config) => self.cache.set_config(&name, config),
            None => self.cache.remove_config(&name),
        }
        let replaced = self.registry.register(plugin);
        if replaced {
            self.cache.clear(&name);
        }
        replaced
    }

    /// Remove a plugin and every piece of per-tool state
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ToolPlugin>> {
        let removed = self.registry.unregister(name)?;
        self.rate_limiter.remove(name);
        self.cache.clear(name);
        self.cache.remove_config(name);
        self.runtime.circuit_breaker().remove(name);
        Some(removed)
    }

    /// Zero a tool's metrics, rate window, cache, and breaker
    pub fn reset(&self, name: &str) {
        if let Some(metrics) = self.registry.metrics(name) {
            metrics.reset();
        }
        self.rate_limiter.reset(name);
        self.cache.clear(name);
        self.runtime.circuit_breaker().reset(name);
        tracing::info!(tool = %name, "Tool state reset");
    }

    pub fn reset_all(&self) {
        for name in self.registry.names() {
            self.reset(&name);
        }
    }

    /// Metrics snapshot of one tool
    pub fn get_metrics(&self, name: &str) -> Option<ToolMetricsSnapshot> {
        let entry = self.registry.entry(name)?;
        Some(self.snapshot(&entry))
    }

    /// Metrics snapshots of every tool, sorted by name
    pub fn get_all_metrics(&self) -> Vec<ToolMetricsSnapshot> {
        self.registry
            .entries()
            .iter()
            .map(|entry| self.snapshot(entry))
            .collect()
    }

    fn snapshot(&self, entry: &RegisteredTool) -> ToolMetricsSnapshot {
        let name = entry.plugin.name();
        let state = if self.breaker_config(entry.plugin.as_ref()).enabled {
            self.runtime.circuit_breaker().get_state(name)
        } else {
            CircuitState::Closed
        };
        let status = ToolStatus::from_state(entry.plugin.metadata().enabled, state);
        let mut snapshot = entry.metrics.snapshot(name, status, state);

        // Admission is decided by the limiter's slots, so report those
        let limited = entry
            .plugin
            .rate_limit()
            .is_some_and(|limits| limits.max_concurrent.is_some());
        if limited {
            snapshot.concurrent = self.rate_limiter.concurrent(name) as u64;
        }
        snapshot
    }

    /// Start the periodic cache sweep; returns `false` outside a tokio runtime
    pub fn start_cache_sweeper(&self, interval: Duration) -> bool {
        if tokio::runtime::Handle::try_current().is_err() || interval.is_zero() {
            return false;
        }
        let handle = self.cache.spawn_sweeper(interval);
        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        true
    }

    /// Stop the cache sweeper and destroy the active breaker's timers
    pub fn shutdown(&self) {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        self.runtime.circuit_breaker().destroy();
        tracing::info!("Tool executor shut down");
    }

    /// Execute a tool with default options
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ExecutionResult {
        self.execute_with(name, params, ctx, ExecuteOptions::default())
            .await
    }

    /// Execute a tool through the full pipeline
    pub async fn execute_with(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
        options: ExecuteOptions,
    ) -> ExecutionResult {
        let started = Instant::now();

        // Stage 1: lookup
        let Some(RegisteredTool { plugin, metrics }) = self.registry.entry(name) else {
            tracing::debug!(tool = %name, "Call to unregistered tool");
            return ExecutionResult::failure(name, ToolError::not_found(name), started.elapsed());
        };
        metrics.record_call();

        if !plugin.metadata().enabled {
            return self.reject(name, &metrics, ToolError::disabled(name), started);
        }

        // Stage 2: validate
        if let Err(errors) = plugin.schema().validate(&params) {
            return self.reject(name, &metrics, ToolError::validation(errors), started);
        }

        let cache_config = plugin.cache().filter(|config| config.enabled);
        let cache_key = cache_config.as_ref().map(|config| {
            self.cache.ensure_config(name, config);
            CacheKey::derive(name, config.key_strategy, ctx, &params)
        });

        // Stage 3: circuit check
        let breaker = self.runtime.circuit_breaker();
        let breaker_config = self.breaker_config(plugin.as_ref());
        let admission = breaker.can_execute(name, &breaker_config);
        if !admission.allowed {
            let reason = admission
                .reason
                .unwrap_or_else(|| format!("Circuit breaker rejected call to '{}'", name));
            let mut error = ToolError::circuit_open(reason);
            if let Some(delay) = admission.retry_after {
                error = error.with_retry_after(delay);
            }
            metrics.record_rejection();
            if self.config.degrade_on_circuit_open
                && options.allow_degraded
                && let Some(degraded) = self.degrade(name, cache_key.as_ref(), &error, started)
            {
                return degraded;
            }
            tracing::debug!(tool = %name, state = %admission.state, "Call rejected by circuit breaker");
            return ExecutionResult::failure(name, error, started.elapsed());
        }
        let mut admitted = AdmissionGuard::new(breaker.clone(), name, admission.state);

        // Stage 4: rate check
        let permit = match plugin.rate_limit() {
            Some(limits) => match self.rate_limiter.try_acquire(name, &limits) {
                Ok(permit) => Some(permit),
                Err(rejection) => {
                    drop(admitted);
                    let mut error = ToolError::rate_limited(format!("{} for tool '{}'", rejection, name));
                    if let Some(delay) = rejection.retry_after() {
                        error = error.with_retry_after(delay);
                    }
                    return self.reject(name, &metrics, error, started);
                }
            },
            None => None,
        };

        // Stage 5: cache lookup
        if !options.bypass_cache
            && let Some(key) = &cache_key
            && let Some(cached) = self.cache.get(key)
        {
            drop(permit);
            drop(admitted);
            metrics.record_cache_hit();
            tracing::debug!(tool = %name, key = %key, "Cache hit");
            return ExecutionResult::from_cache(name, cached, started.elapsed());
        }

        // Stage 6: invoke
        let deadline = options
            .timeout
            .or_else(|| plugin.rate_limit().and_then(|limits| limits.timeout))
            .or(self.config.default_timeout);
        let invoked_at = Instant::now();
        let outcome = {
            let _in_flight = metrics.enter();
            invoke(plugin.clone(), params, ctx.clone(), deadline).await
        };
        let latency = invoked_at.elapsed();
        drop(permit);
        admitted.settle();

        // Stages 7 and 8: record, then degrade on failure
        match outcome {
            Ok(result) if result.success => {
                breaker.record_success(name, &breaker_config);
                metrics.record_invocation(true, latency);
                if let (Some(config), Some(key)) = (&cache_config, &cache_key) {
                    self.cache.set(key, result.clone(), config.ttl);
                }
                tracing::debug!(
                    tool = %name,
                    duration_ms = latency.as_millis() as u64,
                    "Tool executed"
                );
                ExecutionResult::from_tool_result(name, result, started.elapsed())
            }
            Ok(result) => {
                let error = ToolError::from_failed_result(&result);
                self.record_failure(
                    breaker.as_ref(),
                    name,
                    &breaker_config,
                    &metrics,
                    &error,
                    Some(&result),
                    latency,
                );
                if options.allow_degraded
                    && let Some(degraded) = self.degrade(name, cache_key.as_ref(), &error, started)
                {
                    return degraded;
                }
                ExecutionResult::from_tool_result(name, result, started.elapsed())
            }
            Err(error) => {
                self.record_failure(
                    breaker.as_ref(),
                    name,
                    &breaker_config,
                    &metrics,
                    &error,
                    None,
                    latency,
                );
                if options.allow_degraded
                    && let Some(degraded) = self.degrade(name, cache_key.as_ref(), &error, started)
                {
                    return degraded;
                }
                ExecutionResult::failure(name, error, started.elapsed())
            }
        }
    }

    fn reject(
        &self,
        name: &str,
        metrics: &ToolMetrics,
        error: ToolError,
        started: Instant,
    ) -> ExecutionResult {
        metrics.record_rejection();
        tracing::debug!(tool = %name, kind = ?error.kind, reason = %error.message, "Call rejected");
        ExecutionResult::failure(name, error, started.elapsed())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_failure(
        &self,
        breaker: &dyn CircuitBreaker,
        name: &str,
        breaker_config: &CircuitBreakerConfig,
        metrics: &ToolMetrics,
        error: &ToolError,
        result: Option<&ToolResult>,
        latency: Duration,
    ) {
        let counted = breaker.record_failure(
            name,
            breaker_config,
            &FailureContext::new(Some(error), result),
        );
        metrics.record_invocation(false, latency);

        if error.kind == ToolErrorKind::Timeout {
            tracing::warn!(tool = %name, counted, "Tool execution timed out");
        } else {
            tracing::warn!(
                tool = %name,
                kind = ?error.kind,
                error = %error.message,
                counted,
                "Tool execution failed"
            );
        }
    }

    fn degrade(
        &self,
        name: &str,
        key: Option<&CacheKey>,
        error: &ToolError,
        started: Instant,
    ) -> Option<ExecutionResult> {
        let key = key?;
        let window = self.cache.stale_window(name)?;
        let stale = self.cache.get_stale(key, window)?;
        tracing::warn!(
            tool = %name,
            masked = ?error.kind,
            "Serving stale cached result in place of failed call"
        );
        Some(ExecutionResult::degraded(name, stale, error.clone(), started.elapsed()))
    }
}

/// Hands a claimed half-open slot back to the breaker unless the call's
/// outcome is recorded
///
/// Dropped without `settle` when the call stops short of invoking the tool
/// or the caller stops awaiting it mid-invocation.
struct AdmissionGuard {
    breaker: Arc<dyn CircuitBreaker>,
    tool: String,
    claimed: bool,
}

impl AdmissionGuard {
    fn new(breaker: Arc<dyn CircuitBreaker>, tool: &str, state: CircuitState) -> Self {
        Self {
            breaker,
            tool: tool.to_string(),
            claimed: state == CircuitState::HalfOpen,
        }
    }

    /// The outcome is about to be recorded, which releases the slot itself
    fn settle(&mut self) {
        self.claimed = false;
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.claimed {
            tracing::debug!(tool = %self.tool, "Releasing unused half-open admission");
            self.breaker.release_admission(&self.tool);
        }
    }
}

impl Drop for ToolExecutor {
    fn drop(&mut self) {
        if let Some(sweeper) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
    }
}

/// Run the plugin in its own task under an optional deadline
async fn invoke(
    plugin: Arc<dyn ToolPlugin>,
    params: Value,
    ctx: ToolContext,
    deadline: Option<Duration>,
) -> Result<ToolResult, ToolError> {
    let mut handle = tokio::spawn(async move { plugin.execute(params, &ctx).await });

    let joined = match deadline {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // Best effort: the plugin only stops at its next await point
                handle.abort();
                return Err(ToolError::timeout(limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(ToolError::panicked(format!("Tool panicked: {}", message)))
        }
        Err(e) => Err(ToolError::execution(format!("Tool task was cancelled: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CacheConfig, FnTool, RateLimitConfig, ToolMetadata, ToolSchema};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> ToolExecutor {
        ToolExecutor::new(Arc::new(ToolRegistry::new()))
    }

    fn counting_tool(name: &str, calls: Arc<AtomicU32>) -> FnTool {
        FnTool::new(
            ToolMetadata::new(name, "Counts invocations"),
            ToolSchema::any_object(),
            move |params, _ctx| {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(ToolResult::success(json!({"call": n, "params": params})))
                }
            },
        )
    }

    fn failing_tool(name: &str) -> FnTool {
        FnTool::new(
            ToolMetadata::new(name, "Always fails"),
            ToolSchema::any_object(),
            |_params, _ctx| async { Err(ToolError::execution("upstream exploded")) },
        )
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_tools() {
        let executor = executor();
        executor.register(
            FnTool::new(
                ToolMetadata::new("off", "Disabled").disabled(),
                ToolSchema::any_object(),
                |_p, _c| async { Ok(ToolResult::success(json!(null))) },
            )
            .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        let missing = executor.execute("missing", json!({}), &ctx).await;
        assert_eq!(missing.error_kind(), Some(ToolErrorKind::NotFound));

        let off = executor.execute("off", json!({}), &ctx).await;
        assert_eq!(off.error_kind(), Some(ToolErrorKind::Disabled));
        assert_eq!(executor.get_metrics("off").unwrap().status, ToolStatus::Disabled);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_breaker() {
        let executor = executor();
        executor.register(
            FnTool::new(
                ToolMetadata::new("search", "Search"),
                ToolSchema::new(json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                })),
                |_p, _c| async { Ok(ToolResult::success(json!([]))) },
            )
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1))
            .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        for _ in 0..3 {
            let result = executor.execute("search", json!({"limit": 1}), &ctx).await;
            assert_eq!(result.error_kind(), Some(ToolErrorKind::Validation));
        }
        let metrics = executor.get_metrics("search").unwrap();
        assert_eq!(metrics.circuit_breaker_state, CircuitState::Closed);
        assert_eq!(metrics.rejected_calls, 3);
        assert_eq!(metrics.failed_calls, 0);
    }

    #[tokio::test]
    async fn test_failures_open_circuit_then_reject() {
        let executor = executor();
        executor.register(
            failing_tool("flaky")
                .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(2))
                .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        for _ in 0..2 {
            let result = executor.execute("flaky", json!({}), &ctx).await;
            assert_eq!(result.error_kind(), Some(ToolErrorKind::Execution));
        }
        let rejected = executor.execute("flaky", json!({}), &ctx).await;
        assert_eq!(rejected.error_kind(), Some(ToolErrorKind::CircuitOpen));

        let metrics = executor.get_metrics("flaky").unwrap();
        assert_eq!(metrics.status, ToolStatus::Unavailable);
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.failed_calls, 2);
        assert_eq!(metrics.rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_invocation() {
        let executor = executor();
        let calls = Arc::new(AtomicU32::new(0));
        executor.register(
            counting_tool("lookup", calls.clone())
                .with_cache(CacheConfig::new(Duration::from_secs(60)))
                .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        let first = executor.execute("lookup", json!({"q": 1}), &ctx).await;
        let second = executor.execute("lookup", json!({"q": 1}), &ctx).await;
        let other = executor.execute("lookup", json!({"q": 2}), &ctx).await;
        let bypassed = executor
            .execute_with("lookup", json!({"q": 1}), &ctx, ExecuteOptions::new().bypass_cache())
            .await;

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert!(!other.from_cache);
        assert!(!bypassed.from_cache);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let metrics = executor.get_metrics("lookup").unwrap();
        assert_eq!(metrics.cache_hits, 1);
        assert!((metrics.cache_hit_rate - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_an_execution_failure() {
        let executor = executor();
        executor.register(
            FnTool::new(
                ToolMetadata::new("slow", "Sleeps"),
                ToolSchema::any_object(),
                |_p, _c| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(ToolResult::success(json!("late")))
                },
            )
            .with_rate_limit(
                RateLimitConfig::new()
                    .with_max_concurrent(1)
                    .with_timeout(Duration::from_millis(100)),
            )
            .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        let result = executor.execute("slow", json!({}), &ctx).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Timeout));
        assert_eq!(executor.rate_limiter().concurrent("slow"), 0);

        let metrics = executor.get_metrics("slow").unwrap();
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.concurrent, 0);
        assert_eq!(executor.runtime().circuit_breaker().get_stats("slow").failures, 1);
    }

    async fn explode() -> Result<ToolResult, ToolError> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let executor = executor();
        executor.register(
            FnTool::new(
                ToolMetadata::new("boom", "Panics"),
                ToolSchema::any_object(),
                |_p, _c| explode(),
            )
            .into_plugin(),
        );

        let result = executor.execute("boom", json!({}), &ToolContext::new("u")).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Panicked));
        assert!(result.error.unwrap().message.contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_result_after_failure() {
        let executor = executor();
        let healthy = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = healthy.clone();
        executor.register(
            FnTool::new(
                ToolMetadata::new("plans", "Lists plans"),
                ToolSchema::any_object(),
                move |_p, _c| {
                    let flag = flag.clone();
                    async move {
                        if flag.load(Ordering::SeqCst) {
                            Ok(ToolResult::success(json!(["plan-a"])))
                        } else {
                            Ok(ToolResult::failure("storage offline").with_status_code(503))
                        }
                    }
                },
            )
            .with_cache(
                CacheConfig::new(Duration::from_secs(1))
                    .with_stale_if_error(Duration::from_secs(60)),
            )
            .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        executor.execute("plans", json!({}), &ctx).await;
        healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let degraded = executor.execute("plans", json!({}), &ctx).await;
        assert!(degraded.success);
        assert!(degraded.degraded);
        assert!(degraded.from_cache);
        assert_eq!(degraded.data, json!(["plan-a"]));
        assert_eq!(degraded.masked_error.unwrap().status_code, Some(503));

        let strict = executor
            .execute_with("plans", json!({}), &ctx, ExecuteOptions::new().without_degraded())
            .await;
        assert!(!strict.success);
        assert!(!strict.degraded);
    }

    const FAIL: u32 = 0;
    const HANG: u32 = 1;
    const SUCCEED: u32 = 2;

    fn moody_tool(name: &str, mode: Arc<AtomicU32>) -> FnTool {
        FnTool::new(
            ToolMetadata::new(name, "Fails, hangs, or succeeds on demand"),
            ToolSchema::any_object(),
            move |_params, _ctx| {
                let mode = mode.load(Ordering::SeqCst);
                async move {
                    match mode {
                        FAIL => Err(ToolError::execution("upstream exploded")),
                        HANG => {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok(ToolResult::success(json!("late")))
                        }
                        _ => Ok(ToolResult::success(json!("ok"))),
                    }
                }
            },
        )
        .with_circuit_breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(1)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_call_frees_the_circuit() {
        let executor = executor();
        let mode = Arc::new(AtomicU32::new(FAIL));
        executor.register(moody_tool("moody", mode.clone()).into_plugin());
        let breaker = executor.runtime().circuit_breaker();
        let ctx = ToolContext::new("u");

        executor.execute("moody", json!({}), &ctx).await;
        assert_eq!(breaker.get_state("moody"), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(breaker.get_state("moody"), CircuitState::HalfOpen);

        // The caller gives up while the admitted call is still running
        mode.store(HANG, Ordering::SeqCst);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            executor.execute("moody", json!({}), &ctx),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.get_state("moody"), CircuitState::HalfOpen);
        assert_eq!(executor.get_metrics("moody").unwrap().concurrent, 0);

        mode.store(SUCCEED, Ordering::SeqCst);
        let next = executor.execute("moody", json!({}), &ctx).await;
        assert!(next.success, "unexpected error: {:?}", next.error);
        assert_eq!(breaker.get_state("moody"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admission_released_on_cache_hit() {
        let executor = executor();
        let mode = Arc::new(AtomicU32::new(SUCCEED));
        executor.register(
            moody_tool("moody", mode.clone())
                .with_cache(CacheConfig::new(Duration::from_secs(600)))
                .into_plugin(),
        );
        let breaker = executor.runtime().circuit_breaker();
        let ctx = ToolContext::new("u");

        executor.execute("moody", json!({"q": 1}), &ctx).await;
        mode.store(FAIL, Ordering::SeqCst);
        executor.execute("moody", json!({"q": 2}), &ctx).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(breaker.get_state("moody"), CircuitState::HalfOpen);

        let cached = executor.execute("moody", json!({"q": 1}), &ctx).await;
        assert!(cached.from_cache);

        // The slot is free again, so the next call reaches the tool
        mode.store(SUCCEED, Ordering::SeqCst);
        let next = executor.execute("moody", json!({"q": 3}), &ctx).await;
        assert!(next.success);
        assert!(!next.from_cache);
        assert_eq!(breaker.get_state("moody"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reports_limiter_slots() {
        let executor = executor();
        executor.register(
            FnTool::new(
                ToolMetadata::new("slow", "Sleeps"),
                ToolSchema::any_object(),
                |_p, _c| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(ToolResult::success(json!("done")))
                },
            )
            .with_rate_limit(RateLimitConfig::new().with_max_concurrent(2))
            .into_plugin(),
        );
        let ctx = ToolContext::new("u");

        let observe = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let metrics = executor.get_metrics("slow").unwrap();
            (metrics.concurrent, executor.rate_limiter().concurrent("slow"))
        };
        let (result, (reported, held)) =
            tokio::join!(executor.execute("slow", json!({}), &ctx), observe);

        assert!(result.success);
        assert_eq!(held, 1);
        assert_eq!(reported, held as u64);
        assert_eq!(executor.get_metrics("slow").unwrap().concurrent, 0);
    }

    #[tokio::test]
    async fn test_unregister_and_reset() {
        let executor = executor();
        let calls = Arc::new(AtomicU32::new(0));
        executor.register(counting_tool("count", calls).into_plugin());
        let ctx = ToolContext::new("u");

        executor.execute("count", json!({}), &ctx).await;
        executor.reset("count");
        assert_eq!(executor.get_metrics("count").unwrap().total_calls, 0);

        assert!(executor.unregister("count").is_some());
        assert!(executor.get_metrics("count").is_none());
        let result = executor.execute("count", json!({}), &ctx).await;
        assert_eq!(result.error_kind(), Some(ToolErrorKind::NotFound));
    }
}
