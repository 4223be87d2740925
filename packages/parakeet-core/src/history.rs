//! Process-wide conversation history.
//!
//! A rolling window of chat turns per session, kept in memory only and
//! cleared when the device disconnects. Owned by the bootstrap and passed
//! to the components that need it; nothing here touches storage.

use dashmap::DashMap;

use crate::protocol_constants::HISTORY_MAX_TURNS;
use crate::providers::ChatMessage;

/// Per-session rolling chat history keyed by session id.
#[derive(Default)]
pub struct ConversationHistory {
    turns: DashMap<String, Vec<ChatMessage>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current window for a session, oldest first, capped at
    /// [`HISTORY_MAX_TURNS`] turns.
    pub fn window(&self, session_id: &str) -> Vec<ChatMessage> {
        self.turns
            .get(session_id)
            .map(|turns| turns.clone())
            .unwrap_or_default()
    }

    /// Records one completed exchange. Called only after the provider
    /// returned successfully, so failed calls leave history untouched.
    pub fn record_exchange(&self, session_id: &str, user_text: &str, assistant_text: &str) {
        let mut entry = self.turns.entry(session_id.to_string()).or_default();
        entry.push(ChatMessage::user(user_text));
        entry.push(ChatMessage::assistant(assistant_text));
        let len = entry.len();
        if len > HISTORY_MAX_TURNS {
            entry.drain(..len - HISTORY_MAX_TURNS);
        }
    }

    /// Drops a session's history (called on disconnect).
    pub fn clear(&self, session_id: &str) {
        if self.turns.remove(session_id).is_some() {
            log::info!("[{}] Conversation history cleared", session_id);
        }
    }

    /// Number of stored turns for a session.
    pub fn len(&self, session_id: &str) -> usize {
        self.turns.get(session_id).map_or(0, |turns| turns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_empty_for_unknown_session() {
        let history = ConversationHistory::new();
        assert!(history.window("nope").is_empty());
    }

    #[test]
    fn exchanges_append_in_order() {
        let history = ConversationHistory::new();
        history.record_exchange("s1", "hi", "hello");
        let window = history.window("s1");
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, "user");
        assert_eq!(window[0].content, "hi");
        assert_eq!(window[1].role, "assistant");
    }

    #[test]
    fn window_trims_to_cap() {
        let history = ConversationHistory::new();
        for i in 0..30 {
            history.record_exchange("s1", &format!("q{i}"), &format!("a{i}"));
        }
        let window = history.window("s1");
        assert_eq!(window.len(), HISTORY_MAX_TURNS);
        // Oldest turns dropped, newest kept.
        assert_eq!(window.last().unwrap().content, "a29");
    }

    #[test]
    fn clear_removes_session_only() {
        let history = ConversationHistory::new();
        history.record_exchange("s1", "q", "a");
        history.record_exchange("s2", "q", "a");
        history.clear("s1");
        assert_eq!(history.len("s1"), 0);
        assert_eq!(history.len("s2"), 2);
    }
}
