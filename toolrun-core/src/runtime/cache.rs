//! Per-tool TTL result cache
//!
//! Expiry is checked lazily on every read; an expired entry behaves as absent
//! for [`CacheManager::get`]. Entries of tools with a stale window are kept
//! around past expiry so [`CacheManager::get_stale`] can serve them as
//! degraded results. [`CacheManager::sweep`] (or the background task from
//! [`CacheManager::spawn_sweeper`]) drops entries nothing can read anymore.

use crate::tools::{CacheConfig, KeyStrategy, ToolContext, ToolResult};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Derived cache key, scoped to a tool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool: String,
    pub key: String,
}

impl CacheKey {
    /// Derive the key for a call according to the tool's key strategy
    pub fn derive(tool: &str, strategy: KeyStrategy, ctx: &ToolContext, params: &Value) -> Self {
        let key = match strategy {
            KeyStrategy::Global => tool.to_string(),
            KeyStrategy::User => format!("{}:{}:{}", tool, ctx.user_id, params_hash(params)),
            KeyStrategy::Params => format!("{}:{}", tool, params_hash(params)),
        };
        Self {
            tool: tool.to_string(),
            key,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Short SHA-256 of the params' JSON text (object keys are sorted)
fn params_hash(params: &Value) -> String {
    let json = serde_json::to_string(params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ToolResult,
    expires_at: Instant,
    /// Past this point not even a stale read may return the entry
    retain_until: Instant,
}

type ToolEntries = HashMap<String, HashMap<String, CacheEntry>>;

/// Result cache keyed by tool and derived key
#[derive(Debug, Default)]
pub struct CacheManager {
    configs: RwLock<HashMap<String, CacheConfig>>,
    entries: Mutex<ToolEntries>,
    default_stale_if_error: Option<Duration>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stale window for tools whose cache config does not set one
    pub fn with_default_stale_if_error(mut self, window: Option<Duration>) -> Self {
        self.default_stale_if_error = window;
        self
    }

    fn entries(&self) -> MutexGuard<'_, ToolEntries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_config(&self, tool: &str, config: CacheConfig) {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool.to_string(), config);
    }

    /// Record `config` for the tool unless it is already current
    pub fn ensure_config(&self, tool: &str, config: &CacheConfig) {
        let current = self
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
            .is_some_and(|existing| existing == config);
        if !current {
            self.set_config(tool, config.clone());
        }
    }

    pub fn config(&self, tool: &str) -> Option<CacheConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool)
            .cloned()
    }

    pub fn remove_config(&self, tool: &str) {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool);
    }

    /// How long past expiry a tool's entries may be served as degraded data
    pub fn stale_window(&self, tool: &str) -> Option<Duration> {
        let config = self.config(tool)?;
        if !config.enabled {
            return None;
        }
        config.stale_if_error.or(self.default_stale_if_error)
    }

    /// Live (non-expired) entry
    pub fn get(&self, key: &CacheKey) -> Option<ToolResult> {
        let now = Instant::now();
        let mut entries = self.entries();
        let tool_entries = entries.get_mut(&key.tool)?;
        let entry = tool_entries.get(&key.key)?;

        if now < entry.expires_at {
            return Some(entry.value.clone());
        }
        if now >= entry.retain_until {
            tool_entries.remove(&key.key);
        }
        None
    }

    /// Entry that expired no longer than `max_stale` ago (live entries included)
    pub fn get_stale(&self, key: &CacheKey, max_stale: Duration) -> Option<ToolResult> {
        let now = Instant::now();
        let entries = self.entries();
        let entry = entries.get(&key.tool)?.get(&key.key)?;
        (now < entry.expires_at + max_stale && now < entry.retain_until)
            .then(|| entry.value.clone())
    }

    /// Write or refresh an entry
    pub fn set(&self, key: &CacheKey, value: ToolResult, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now + ttl;
        let retain_until = expires_at + self.stale_window(&key.tool).unwrap_or_default();

        self.entries()
            .entry(key.tool.clone())
            .or_default()
            .insert(
                key.key.clone(),
                CacheEntry {
                    value,
                    expires_at,
                    retain_until,
                },
            );
    }

    /// Drop every entry of a tool; returns how many were removed
    pub fn clear(&self, tool: &str) -> usize {
        self.entries()
            .remove(tool)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn clear_all(&self) {
        self.entries().clear();
    }

    /// Remove entries that can no longer be read; returns how many
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut entries = self.entries();
        for tool_entries in entries.values_mut() {
            let before = tool_entries.len();
            tool_entries.retain(|_, entry| now < entry.retain_until);
            removed += before - tool_entries.len();
        }
        entries.retain(|_, tool_entries| !tool_entries.is_empty());
        removed
    }

    /// Number of stored entries, including stale ones
    pub fn len(&self) -> usize {
        self.entries().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is
    /// aborted or the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}
