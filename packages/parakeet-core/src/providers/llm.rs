//! Reply generation and intent dispatch.
//!
//! Two-stage when an execution endpoint is configured: the chat model
//! first classifies the request into a tagged action (JSON mode), then
//! the action is dispatched: answered directly, routed to a device tool,
//! forwarded to the remote execution agent, or turned into a stored
//! reminder. Without an execution endpoint the responder degrades to a
//! single plain-chat stage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::history::ConversationHistory;
use crate::preferences::PreferenceStore;
use crate::providers::{
    ChatMessage, ClientPool, OpenAiClient, ProviderError, ProviderResult, Responder,
};
use crate::recurrence::parse_recurrence_from_text;
use crate::sender::OutboundSink;
use crate::session::{Session, UserConfig};
use crate::store::{NewReminder, ReminderStore};
use crate::tools::{ToolContext, ToolRegistry};

/// System prompt for the degraded single-stage chat mode.
const CHAT_PROMPT: &str = "你是一个友好的语音助手。请用与用户相同的语言简短回答问题。\
如果用户说中文就用中文回答，说英文就用英文回答。";

/// System prompt for the intent-classification stage.
const INTENT_PROMPT: &str = r#"You are a smart voice assistant. Analyze the user's request and respond in JSON.

Actions:
- {"action": "chat", "response": "your answer"} — questions and conversation you can answer directly
- {"action": "execute", "task": "task description for the execution agent", "reply_hint": "brief status phrase"} — tasks needing real-world action
- {"action": "execute", "tool": "tool.name", "args": {...}} — one of the device tools listed below
- {"action": "music", "query": "song or artist"} — play music
- {"action": "music_stop"} — stop playback
- {"action": "music_pause"} — pause playback
- {"action": "remind", "message": "what to remind", "in_minutes": 30, "rule": "daily"} — set a reminder; omit "rule" for one-shot

Device tools:
{tools}

IMPORTANT: Always respond with valid JSON only. No markdown, no code blocks."#;

/// Spoken when the execution agent fails.
const EXECUTE_FAILED_REPLY: &str =
    "Sorry, I couldn't complete that task right now. Please try again later.";

/// One classified intent with its payload.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentAction {
    Chat {
        response: String,
    },
    Execute {
        #[serde(default)]
        task: Option<String>,
        #[serde(default)]
        reply_hint: Option<String>,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        args: Option<serde_json::Value>,
    },
    Music {
        query: String,
    },
    MusicStop,
    MusicPause,
    Remind {
        message: String,
        #[serde(default)]
        in_minutes: Option<i64>,
        #[serde(default)]
        rule: Option<String>,
    },
}

/// Parses the model's intent JSON, treating anything unparseable as a
/// plain chat reply (models occasionally ignore JSON mode).
pub fn parse_intent(raw: &str) -> IntentAction {
    serde_json::from_str(raw).unwrap_or_else(|_| IntentAction::Chat {
        response: raw.trim().to_string(),
    })
}

/// Reply-generation service.
pub struct LlmService {
    pool: Arc<ClientPool>,
    settings: ProviderSettings,
    history: Arc<ConversationHistory>,
    preferences: Arc<PreferenceStore>,
    reminders: Arc<ReminderStore>,
    tools: Arc<ToolRegistry>,
    exec_client: Option<OpenAiClient>,
}

impl LlmService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        pool: Arc<ClientPool>,
        settings: ProviderSettings,
        history: Arc<ConversationHistory>,
        preferences: Arc<PreferenceStore>,
        reminders: Arc<ReminderStore>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let exec_client = settings.exec_configured().then(|| {
            OpenAiClient::new(
                http.clone(),
                settings.exec_base_url.clone(),
                settings.exec_api_key.clone(),
            )
        });
        Self {
            pool,
            settings,
            history,
            preferences,
            reminders,
            tools,
            exec_client,
        }
    }

    fn system_prompt(&self, device_id: &str, intent: bool) -> String {
        let base = if intent {
            INTENT_PROMPT.replace("{tools}", &self.tools.descriptions())
        } else {
            CHAT_PROMPT.to_string()
        };
        let prefs = self.preferences.prompt_fragment(device_id);
        if prefs.is_empty() {
            base
        } else {
            format!("{base}\n\n{prefs}")
        }
    }

    fn build_messages(&self, session: &Session, text: &str, intent: bool) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(
            self.system_prompt(&session.device_id, intent),
        )];
        messages.extend(self.history.window(&session.session_id));
        messages.push(ChatMessage::user(text));
        messages
    }

    /// Chat call with the per-user-first, default-once fallback rule.
    async fn chat_with_fallback(
        &self,
        user: &UserConfig,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> ProviderResult<String> {
        let model = UserConfig::pick(&user.chat_model, &self.settings.chat_model);
        let client = self.pool.for_user(Some(user));
        match client.chat(model, messages, json_mode).await {
            Ok(reply) => Ok(reply),
            Err(e) if user.has_key() => {
                log::warn!("[LLM] Per-user chat failed ({}), retrying default", e);
                self.pool
                    .default_client()
                    .chat(&self.settings.chat_model, messages, json_mode)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Forwards a task description to the remote execution agent.
    async fn execute_remote(&self, task: &str) -> ProviderResult<String> {
        let Some(client) = self.exec_client.as_ref() else {
            return Err(ProviderError::Malformed(
                "execute intent without an execution endpoint".into(),
            ));
        };
        client
            .chat(&self.settings.chat_model, &[ChatMessage::user(task)], false)
            .await
    }

    async fn dispatch(
        &self,
        intent: IntentAction,
        user_text: &str,
        session: &Arc<Session>,
        sink: &Arc<dyn OutboundSink>,
    ) -> String {
        let sid = &session.session_id;
        match intent {
            IntentAction::Chat { response } => {
                log::info!("[{}] Intent: chat", sid);
                response
            }

            IntentAction::Execute {
                tool: Some(name),
                args,
                ..
            } => {
                log::info!("[{}] Intent: tool {}", sid, name);
                let ctx = ToolContext {
                    session: Arc::clone(session),
                    sink: Arc::clone(sink),
                    history: Arc::clone(&self.history),
                };
                self.tools
                    .invoke(&name, &args.unwrap_or(serde_json::Value::Null), &ctx)
                    .await
                    .message
            }

            IntentAction::Execute {
                task, reply_hint, ..
            } => {
                let task = task.unwrap_or_else(|| user_text.to_string());
                log::info!(
                    "[{}] Intent: execute '{}' (hint: {})",
                    sid,
                    task.chars().take(80).collect::<String>(),
                    reply_hint.as_deref().unwrap_or("-")
                );
                match self.execute_remote(&task).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        log::error!("[{}] Execution failed: {}", sid, e);
                        EXECUTE_FAILED_REPLY.to_string()
                    }
                }
            }

            IntentAction::Music { query } => {
                log::info!("[{}] Intent: music '{}'", sid, query);
                "抱歉，这台设备还没有接入音乐服务".to_string()
            }

            IntentAction::MusicStop => {
                session.set_music_playing(false);
                session.set_music_paused(false);
                "已停止播放".to_string()
            }

            IntentAction::MusicPause => {
                if session.music_playing() {
                    session.set_music_paused(true);
                    "已暂停播放".to_string()
                } else {
                    "现在没有正在播放的音乐".to_string()
                }
            }

            IntentAction::Remind {
                message,
                in_minutes,
                rule,
            } => {
                let rule = rule
                    .filter(|r| !r.is_empty())
                    .or_else(|| parse_recurrence_from_text(user_text));
                let remind_at =
                    Utc::now().timestamp() + in_minutes.unwrap_or(0).max(0) * 60;
                let reminder = NewReminder {
                    user_id: session.config.read().user_id,
                    device_id: session.device_id.clone(),
                    remind_at,
                    message: message.clone(),
                    is_recurring: rule.is_some(),
                    recurrence_rule: rule,
                };
                match self.reminders.insert(&reminder).await {
                    Ok(id) => {
                        log::info!("[{}] Reminder #{} stored: '{}'", sid, id, message);
                        format!("好的，我会提醒你：{message}")
                    }
                    Err(e) => {
                        log::error!("[{}] Failed to store reminder: {}", sid, e);
                        "抱歉，提醒没有保存成功".to_string()
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Responder for LlmService {
    async fn respond(
        &self,
        text: &str,
        session: &Arc<Session>,
        sink: &Arc<dyn OutboundSink>,
    ) -> ProviderResult<String> {
        let user = session.config.read().clone();

        let reply = if self.settings.exec_configured() {
            let messages = self.build_messages(session, text, true);
            let raw = self.chat_with_fallback(&user, &messages, true).await?;
            log::info!(
                "[{}] Intent raw: {}",
                session.session_id,
                raw.chars().take(200).collect::<String>()
            );
            self.dispatch(parse_intent(&raw), text, session, sink).await
        } else {
            let messages = self.build_messages(session, text, false);
            self.chat_with_fallback(&user, &messages, false).await?
        };

        self.history
            .record_exchange(&session.session_id, text, &reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_intent() {
        let intent = parse_intent(r#"{"action":"chat","response":"hello"}"#);
        assert_eq!(
            intent,
            IntentAction::Chat {
                response: "hello".to_string()
            }
        );
    }

    #[test]
    fn parses_execute_with_tool() {
        let intent = parse_intent(r#"{"action":"execute","tool":"volume.set","args":{"level":30}}"#);
        match intent {
            IntentAction::Execute { tool, args, .. } => {
                assert_eq!(tool.as_deref(), Some("volume.set"));
                assert_eq!(args.unwrap()["level"], 30);
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[test]
    fn parses_remind_intent() {
        let intent =
            parse_intent(r#"{"action":"remind","message":"吃药","in_minutes":30,"rule":"daily"}"#);
        assert_eq!(
            intent,
            IntentAction::Remind {
                message: "吃药".to_string(),
                in_minutes: Some(30),
                rule: Some("daily".to_string()),
            }
        );
    }

    #[test]
    fn parses_music_variants() {
        assert_eq!(parse_intent(r#"{"action":"music_stop"}"#), IntentAction::MusicStop);
        assert_eq!(
            parse_intent(r#"{"action":"music_pause"}"#),
            IntentAction::MusicPause
        );
    }

    #[test]
    fn malformed_json_degrades_to_chat() {
        let intent = parse_intent("I cannot answer in JSON, sorry.");
        assert_eq!(
            intent,
            IntentAction::Chat {
                response: "I cannot answer in JSON, sorry.".to_string()
            }
        );
    }
}
