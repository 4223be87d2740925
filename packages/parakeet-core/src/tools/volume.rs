//! Device volume control tools.

use async_trait::async_trait;

use crate::protocol::Outbound;
use crate::sender::OutboundSink;
use crate::tools::{Tool, ToolContext, ToolResult};

/// Sets the device volume to an absolute level (0–100).
pub struct VolumeSet;

#[async_trait]
impl Tool for VolumeSet {
    fn name(&self) -> &'static str {
        "volume.set"
    }

    fn description(&self) -> &'static str {
        "Set device volume (0=mute, 100=max)"
    }

    async fn invoke(&self, args: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(level) = args.get("level").and_then(serde_json::Value::as_i64) else {
            return ToolResult::error("volume.set requires a numeric 'level'");
        };
        let level = level.clamp(0, 100) as u8;

        let sent = ctx
            .sink
            .send_json(
                &Outbound::Volume { level },
                &ctx.session.session_id,
                "volume",
            )
            .await;
        if !sent {
            return ToolResult::error("设备暂时无法调节音量");
        }

        let message = match level {
            0 => "已静音".to_string(),
            1..=30 => format!("音量设为{level}%，较小"),
            31..=70 => format!("音量设为{level}%"),
            _ => format!("音量设为{level}%，较大"),
        };
        ToolResult::ok(message)
    }
}

/// Nudges the volume up by one step.
pub struct VolumeUp;

#[async_trait]
impl Tool for VolumeUp {
    fn name(&self) -> &'static str {
        "volume.up"
    }

    fn description(&self) -> &'static str {
        "Increase volume by one step"
    }

    async fn invoke(&self, _args: &serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok("音量已增大")
    }
}

/// Nudges the volume down by one step.
pub struct VolumeDown;

#[async_trait]
impl Tool for VolumeDown {
    fn name(&self) -> &'static str {
        "volume.down"
    }

    fn description(&self) -> &'static str {
        "Decrease volume by one step"
    }

    async fn invoke(&self, _args: &serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok("音量已减小")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationHistory;
    use crate::sender::test_support::RecordingSink;
    use crate::session::Session;
    use std::sync::Arc;

    fn ctx_with_sink() -> (ToolContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let ctx = ToolContext {
            session: Arc::new(Session::new("dev-1")),
            sink: sink.clone(),
            history: Arc::new(ConversationHistory::new()),
        };
        (ctx, sink)
    }

    #[tokio::test]
    async fn set_pushes_volume_message() {
        let (ctx, sink) = ctx_with_sink();
        let result = VolumeSet
            .invoke(&serde_json::json!({"level": 55}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(sink.texts(), vec![r#"{"type":"volume","level":55}"#]);
    }

    #[tokio::test]
    async fn set_clamps_out_of_range_levels() {
        let (ctx, sink) = ctx_with_sink();
        let result = VolumeSet
            .invoke(&serde_json::json!({"level": 250}), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(sink.texts(), vec![r#"{"type":"volume","level":100}"#]);
    }

    #[tokio::test]
    async fn set_without_level_is_an_error() {
        let (ctx, _) = ctx_with_sink();
        let result = VolumeSet.invoke(&serde_json::json!({}), &ctx).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn mute_has_dedicated_message() {
        let (ctx, _) = ctx_with_sink();
        let result = VolumeSet.invoke(&serde_json::json!({"level": 0}), &ctx).await;
        assert_eq!(result.message, "已静音");
    }
}
