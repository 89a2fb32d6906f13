//! Call-scoped context passed to every tool invocation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context for a single tool call
///
/// Owned by the caller and borrowed by the executor and the plugin for the
/// duration of one invocation. Never persisted by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContext {
    /// User the call is made on behalf of
    pub user_id: String,

    /// Conversation the call belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Request ID for correlation
    pub request_id: String,

    /// When the call was issued
    pub timestamp: DateTime<Utc>,
}

impl ToolContext {
    /// Create a context for a user with a fresh request ID
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: None,
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Set conversation ID
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set request ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = ToolContext::new("user-1")
            .with_conversation_id("conv-9")
            .with_request_id("req-42");

        assert_eq!(ctx.user_id, "user-1");
        assert_eq!(ctx.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(ctx.request_id, "req-42");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = ToolContext::new("u");
        let b = ToolContext::new("u");
        assert_ne!(a.request_id, b.request_id);
    }
}
