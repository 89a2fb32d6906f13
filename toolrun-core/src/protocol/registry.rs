//! Ordered registry of protocol adapters

use super::adapters::{AnthropicAdapter, GenericAdapter, OpenAiAdapter, ReActAdapter};
use super::{NormalizedToolCall, ProtocolAdapter, ProtocolError, TextResult};
use crate::tools::{ExecutionResult, ToolContext};
use serde_json::Value;
use std::sync::Arc;

/// Adapters tried in registration order
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("adapters", &self.adapter_names())
            .finish()
    }
}

impl ProtocolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters, most specific first:
    /// `anthropic`, `openai`, `react`, `generic`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AnthropicAdapter));
        registry.register(Arc::new(OpenAiAdapter));
        registry.register(Arc::new(ReActAdapter));
        registry.register(Arc::new(GenericAdapter));
        registry
    }

    /// Append an adapter; earlier adapters win detection
    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        tracing::debug!(adapter = %adapter.name(), position = self.adapters.len(), "Protocol adapter registered");
        self.adapters.push(adapter);
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// First adapter whose `can_handle` accepts the payload
    pub fn detect(&self, raw: &Value) -> Option<Arc<dyn ProtocolAdapter>> {
        for adapter in &self.adapters {
            match adapter.can_handle(raw) {
                Ok(true) => {
                    tracing::debug!(adapter = %adapter.name(), "Protocol detected");
                    return Some(adapter.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(adapter = %adapter.name(), error = %e, "Protocol detection failed, skipping adapter");
                }
            }
        }
        tracing::debug!("No protocol adapter matched");
        None
    }

    /// Detect the protocol and normalize the call
    ///
    /// The adapter name is recorded under `meta.protocol`.
    pub fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
        let adapter = self.detect(raw).ok_or(ProtocolError::Unsupported)?;
        let call = adapter.parse(raw)?;
        Ok(call.with_meta("protocol", Value::String(adapter.name().to_string())))
    }

    /// Render a result as text using the named adapter's formatter, falling
    /// back to [`TextResult::from_execution`]
    pub fn format_result(
        &self,
        protocol: Option<&str>,
        result: &ExecutionResult,
        ctx: &ToolContext,
    ) -> TextResult {
        protocol
            .and_then(|name| self.get(name))
            .and_then(|adapter| adapter.format_to_text_result(result, ctx))
            .unwrap_or_else(|| TextResult::from_execution(result))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;
    use serde_json::json;
    use std::time::Duration;

    struct Named(&'static str);

    impl ProtocolAdapter for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn can_handle(&self, raw: &Value) -> Result<bool, ProtocolError> {
            Ok(raw.get("name").is_some())
        }

        fn parse(&self, raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
            Ok(NormalizedToolCall::new(
                raw["name"].as_str().unwrap_or_default(),
                json!({}),
            ))
        }
    }

    struct Throwing;

    impl ProtocolAdapter for Throwing {
        fn name(&self) -> &str {
            "throwing"
        }

        fn can_handle(&self, _raw: &Value) -> Result<bool, ProtocolError> {
            Err(ProtocolError::malformed("throwing", "detection exploded"))
        }

        fn parse(&self, _raw: &Value) -> Result<NormalizedToolCall, ProtocolError> {
            Err(ProtocolError::Unsupported)
        }
    }

    #[test]
    fn test_first_registered_adapter_wins() {
        let mut registry = ProtocolRegistry::new();
        registry.register(Arc::new(Named("a")));
        registry.register(Arc::new(Named("b")));

        let raw = json!({"name": "search"});
        for _ in 0..10 {
            assert_eq!(registry.detect(&raw).unwrap().name(), "a");
        }
    }

    #[test]
    fn test_throwing_adapter_is_a_non_match() {
        let mut registry = ProtocolRegistry::new();
        registry.register(Arc::new(Throwing));
        registry.register(Arc::new(Named("fallback")));

        let call = registry.parse(&json!({"name": "search"})).unwrap();
        assert_eq!(call.meta["protocol"], "fallback");
    }

    #[test]
    fn test_default_order_prefers_specific_formats() {
        let registry = ProtocolRegistry::with_defaults();
        assert_eq!(
            registry.adapter_names(),
            vec!["anthropic", "openai", "react", "generic"]
        );

        // Also a valid generic payload
        let anthropic = json!({"type": "tool_use", "id": "t1", "name": "search", "input": {}});
        assert_eq!(registry.detect(&anthropic).unwrap().name(), "anthropic");

        let generic = json!({"name": "search", "arguments": {"q": "x"}});
        let call = registry.parse(&generic).unwrap();
        assert_eq!(call.meta["protocol"], "generic");
        assert_eq!(call.params, json!({"q": "x"}));
    }

    #[test]
    fn test_unsupported_payload() {
        let registry = ProtocolRegistry::with_defaults();
        assert_eq!(registry.parse(&json!(42)), Err(ProtocolError::Unsupported));
        assert!(registry.detect(&json!({"name": 7})).is_none());
    }

    #[test]
    fn test_format_result_uses_adapter_formatter() {
        let registry = ProtocolRegistry::with_defaults();
        let ctx = ToolContext::new("u");
        let result = ExecutionResult::from_tool_result(
            "search",
            ToolResult::success(json!("done")),
            Duration::ZERO,
        );

        assert_eq!(
            registry.format_result(Some("react"), &result, &ctx).result_text,
            "Observation: done"
        );
        assert_eq!(registry.format_result(Some("openai"), &result, &ctx).result_text, "done");
        assert_eq!(registry.format_result(None, &result, &ctx).result_text, "done");
    }
}
