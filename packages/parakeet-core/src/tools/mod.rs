//! Tool registry for the LLM execute path.
//!
//! Tools are small device-side actions the assistant can trigger by name.
//! Dispatch never panics: an unknown name or a failed handler comes back
//! as an error [`ToolResult`] the responder can speak.

pub mod player;
pub mod volume;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::history::ConversationHistory;
use crate::sender::OutboundSink;
use crate::session::Session;

/// Shared state handed to every tool invocation.
pub struct ToolContext {
    pub session: Arc<Session>,
    pub sink: Arc<dyn OutboundSink>,
    pub history: Arc<ConversationHistory>,
}

/// Outcome of a tool invocation. `message` is spoken back to the user.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A named device-side action.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn invoke(&self, args: &serde_json::Value, ctx: &ToolContext) -> ToolResult;
}

/// Name → tool dispatch table.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(volume::VolumeSet));
        registry.register(Arc::new(volume::VolumeUp));
        registry.register(Arc::new(volume::VolumeDown));
        registry.register(Arc::new(player::PlayerPause));
        registry.register(Arc::new(player::PlayerResume));
        registry.register(Arc::new(player::PlayerStop));
        registry.register(Arc::new(ConversationReset));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Dispatches by name. Unknown names return an error result rather
    /// than failing the request.
    pub async fn invoke(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.invoke(args, ctx).await,
            None => {
                log::warn!("[{}] Unknown tool requested: {}", ctx.session.session_id, name);
                ToolResult::error(format!("Unknown tool: {name}"))
            }
        }
    }

    /// One-line-per-tool catalogue for the intent prompt.
    pub fn descriptions(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Clears the session's conversation history.
struct ConversationReset;

#[async_trait]
impl Tool for ConversationReset {
    fn name(&self) -> &'static str {
        "conversation.reset"
    }

    fn description(&self) -> &'static str {
        "Clear the current conversation history"
    }

    async fn invoke(&self, _args: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        ctx.history.clear(&ctx.session.session_id);
        ToolResult::ok("好的，对话已清空")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::test_support::RecordingSink;

    fn test_ctx() -> ToolContext {
        ToolContext {
            session: Arc::new(Session::new("dev-1")),
            sink: Arc::new(RecordingSink::new()),
            history: Arc::new(ConversationHistory::new()),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let registry = ToolRegistry::with_builtins();
        let result = registry
            .invoke("nonexistent.tool", &serde_json::json!({}), &test_ctx())
            .await;
        assert!(!result.success);
        assert!(result.message.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        for name in [
            "volume.set",
            "volume.up",
            "volume.down",
            "player.pause",
            "player.resume",
            "player.stop",
            "conversation.reset",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
    }

    #[tokio::test]
    async fn conversation_reset_clears_history() {
        let registry = ToolRegistry::with_builtins();
        let ctx = test_ctx();
        ctx.history
            .record_exchange(&ctx.session.session_id, "q", "a");

        let result = registry
            .invoke("conversation.reset", &serde_json::json!({}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(ctx.history.len(&ctx.session.session_id), 0);
    }

    #[test]
    fn descriptions_list_every_tool() {
        let registry = ToolRegistry::with_builtins();
        let catalogue = registry.descriptions();
        assert!(catalogue.contains("volume.set"));
        assert!(catalogue.contains("player.pause"));
    }
}
