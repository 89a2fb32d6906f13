//! Tool Registry for plugin registration and lookup
//!
//! The `ToolRegistry` provides:
//! - Registration by name, overwriting any previous plugin with that name
//! - Lookup by name
//! - Per-tool metric records, created on first registration
//! - Listing and tag filtering
//!
//! The registry is shared between the executor and the process bootstrap, so
//! every operation takes `&self`.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolrun_core::tools::ToolRegistry;
//!
//! let registry = ToolRegistry::new();
//! registry.register(Arc::new(SearchTool::new()));
//! registry.register(Arc::new(PlanTool::new()));
//!
//! let tool = registry.get("search").unwrap();
//! ```

use super::metrics::ToolMetrics;
use super::plugin::ToolPlugin;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A plugin together with its metric record
#[derive(Clone)]
pub struct RegisteredTool {
    pub plugin: Arc<dyn ToolPlugin>,
    pub metrics: Arc<ToolMetrics>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.plugin.name())
            .finish()
    }
}

/// Summary of a tool for listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Tool version
    pub version: String,
    /// Whether the tool accepts calls
    pub enabled: bool,
    /// Tags for categorization
    pub tags: Vec<String>,
}

impl From<&dyn ToolPlugin> for ToolSummary {
    fn from(tool: &dyn ToolPlugin) -> Self {
        let metadata = tool.metadata();
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            version: metadata.version.clone(),
            enabled: metadata.enabled,
            tags: metadata.tags.clone(),
        }
    }
}

/// Registry of named tool plugins
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.len())
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any plugin with the same name
    ///
    /// Returns `true` when an existing plugin was replaced. The metric record
    /// of a replaced plugin is kept.
    pub fn register(&self, plugin: Arc<dyn ToolPlugin>) -> bool {
        let name = plugin.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);

        match tools.get_mut(&name) {
            Some(existing) => {
                existing.plugin = plugin;
                tracing::info!(tool = %name, "Tool re-registered, previous plugin replaced");
                true
            }
            None => {
                tools.insert(
                    name.clone(),
                    RegisteredTool {
                        plugin,
                        metrics: Arc::new(ToolMetrics::new()),
                    },
                );
                tracing::debug!(tool = %name, "Tool registered");
                false
            }
        }
    }

    /// Register multiple plugins in order
    pub fn register_all(&self, plugins: impl IntoIterator<Item = Arc<dyn ToolPlugin>>) {
        for plugin in plugins {
            self.register(plugin);
        }
    }

    /// Remove a plugin and its metric record
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ToolPlugin>> {
        let removed = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            tracing::info!(tool = %name, "Tool unregistered");
        }
        removed.map(|entry| entry.plugin)
    }

    /// Get a plugin by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolPlugin>> {
        self.entry(name).map(|entry| entry.plugin)
    }

    /// Get a plugin together with its metric record
    pub fn entry(&self, name: &str) -> Option<RegisteredTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Metric record of a tool
    pub fn metrics(&self, name: &str) -> Option<Arc<ToolMetrics>> {
        self.entry(name).map(|entry| entry.metrics)
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// All registered entries, sorted by name
    pub fn entries(&self) -> Vec<RegisteredTool> {
        let mut entries: Vec<RegisteredTool> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.plugin.name().cmp(b.plugin.name()));
        entries
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List all tools with their summaries, sorted by name
    pub fn list(&self) -> Vec<ToolSummary> {
        self.entries()
            .iter()
            .map(|entry| ToolSummary::from(entry.plugin.as_ref()))
            .collect()
    }

    /// Filter tools by tag
    pub fn filter_by_tag(&self, tag: &str) -> Vec<Arc<dyn ToolPlugin>> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.plugin.metadata().tags.iter().any(|t| t == tag))
            .map(|entry| entry.plugin)
            .collect()
    }
}
