//! Playback control tools.
//!
//! These only flip the session's coarse activity flags; actual media
//! transport is handled device-side. The flags gate reminder delivery.

use async_trait::async_trait;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Pauses playback, if any.
pub struct PlayerPause;

#[async_trait]
impl Tool for PlayerPause {
    fn name(&self) -> &'static str {
        "player.pause"
    }

    fn description(&self) -> &'static str {
        "Pause the current playback"
    }

    async fn invoke(&self, _args: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if !ctx.session.music_playing() {
            return ToolResult::ok("现在没有正在播放的音乐");
        }
        ctx.session.set_music_paused(true);
        ToolResult::ok("已暂停播放")
    }
}

/// Resumes paused playback.
pub struct PlayerResume;

#[async_trait]
impl Tool for PlayerResume {
    fn name(&self) -> &'static str {
        "player.resume"
    }

    fn description(&self) -> &'static str {
        "Resume paused playback"
    }

    async fn invoke(&self, _args: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if !ctx.session.music_paused() {
            return ToolResult::ok("现在没有暂停中的音乐");
        }
        ctx.session.set_music_paused(false);
        ToolResult::ok("继续播放")
    }
}

/// Stops playback entirely.
pub struct PlayerStop;

#[async_trait]
impl Tool for PlayerStop {
    fn name(&self) -> &'static str {
        "player.stop"
    }

    fn description(&self) -> &'static str {
        "Stop the current playback"
    }

    async fn invoke(&self, _args: &serde_json::Value, ctx: &ToolContext) -> ToolResult {
        ctx.session.set_music_playing(false);
        ctx.session.set_music_paused(false);
        ToolResult::ok("已停止播放")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationHistory;
    use crate::sender::test_support::RecordingSink;
    use crate::session::Session;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext {
            session: Arc::new(Session::new("dev-1")),
            sink: Arc::new(RecordingSink::new()),
            history: Arc::new(ConversationHistory::new()),
        }
    }

    #[tokio::test]
    async fn pause_without_music_explains() {
        let ctx = ctx();
        let result = PlayerPause.invoke(&serde_json::json!({}), &ctx).await;
        assert!(result.message.contains("没有"));
        assert!(!ctx.session.music_paused());
    }

    #[tokio::test]
    async fn pause_resume_cycle() {
        let ctx = ctx();
        ctx.session.set_music_playing(true);

        let result = PlayerPause.invoke(&serde_json::json!({}), &ctx).await;
        assert!(result.message.contains("暂停"));
        assert!(ctx.session.music_paused());

        let result = PlayerResume.invoke(&serde_json::json!({}), &ctx).await;
        assert!(result.message.contains("继续"));
        assert!(!ctx.session.music_paused());
    }

    #[tokio::test]
    async fn stop_clears_both_flags() {
        let ctx = ctx();
        ctx.session.set_music_playing(true);
        ctx.session.set_music_paused(true);

        let result = PlayerStop.invoke(&serde_json::json!({}), &ctx).await;
        assert!(result.message.contains("停止"));
        assert!(!ctx.session.music_playing());
        assert!(!ctx.session.music_paused());
    }
}
