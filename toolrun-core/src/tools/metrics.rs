//! Per-tool call metrics
//!
//! Counters are strictly additive; only [`ToolMetrics::reset`] brings them
//! back to zero. The in-flight gauge is driven by an RAII guard so it can
//! never go negative.

use crate::runtime::CircuitState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one registered tool
#[derive(Debug, Default)]
pub struct ToolMetrics {
    total_calls: AtomicU64,
    success_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
    cache_hits: AtomicU64,
    invocations: AtomicU64,
    total_latency_micros: AtomicU64,
    in_flight: AtomicU64,
}

impl ToolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a call that reached a registered tool
    pub fn record_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a caller error or admission rejection
    pub fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a call answered from cache
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.success_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished invocation
    pub fn record_invocation(&self, success: bool, latency: Duration) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.total_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.success_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Mark an invocation as in flight until the guard drops
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    /// Invocations currently running
    pub fn concurrent(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Zero every counter (the in-flight gauge is left alone)
    pub fn reset(&self) {
        for counter in [
            &self.total_calls,
            &self.success_calls,
            &self.failed_calls,
            &self.rejected_calls,
            &self.cache_hits,
            &self.invocations,
            &self.total_latency_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(
        &self,
        name: impl Into<String>,
        status: ToolStatus,
        circuit_breaker_state: CircuitState,
    ) -> ToolMetricsSnapshot {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let invocations = self.invocations.load(Ordering::Relaxed);
        let latency_micros = self.total_latency_micros.load(Ordering::Relaxed);

        let average_latency_ms = if invocations == 0 {
            0.0
        } else {
            latency_micros as f64 / invocations as f64 / 1000.0
        };
        let cache_hit_rate = if total_calls == 0 {
            0.0
        } else {
            cache_hits as f64 / total_calls as f64
        };

        ToolMetricsSnapshot {
            name: name.into(),
            status,
            total_calls,
            success_calls: self.success_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            cache_hits,
            average_latency_ms,
            cache_hit_rate,
            concurrent: self.concurrent(),
            circuit_breaker_state,
        }
    }
}

/// Decrements the in-flight gauge on drop
pub struct InFlightGuard<'a> {
    metrics: &'a ToolMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Health of a tool as seen by observability consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Enabled and circuit closed
    Healthy,
    /// Circuit half-open, probing
    Recovering,
    /// Circuit open
    Unavailable,
    /// Tool disabled in its metadata
    Disabled,
}

impl ToolStatus {
    pub fn from_state(enabled: bool, state: CircuitState) -> Self {
        match (enabled, state) {
            (false, _) => ToolStatus::Disabled,
            (true, CircuitState::Closed) => ToolStatus::Healthy,
            (true, CircuitState::HalfOpen) => ToolStatus::Recovering,
            (true, CircuitState::Open) => ToolStatus::Unavailable,
        }
    }
}

/// Metrics read model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetricsSnapshot {
    pub name: String,
    pub status: ToolStatus,
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub cache_hits: u64,
    /// Mean invocation latency in milliseconds
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64,
    /// Calls currently executing: the rate limiter's held slots when the
    /// tool has a concurrency limit, otherwise the in-flight gauge
    pub concurrent: u64,
    pub circuit_breaker_state: CircuitState,
}
