//! Device-level user preferences.
//!
//! A small key-value store loaded into memory when a device connects and
//! cleared on disconnect. Known keys are rendered into the LLM system
//! prompt so the assistant can personalize replies.

use dashmap::DashMap;
use std::collections::HashMap;

/// Values longer than this are truncated on write.
const MAX_PREF_VALUE_LEN: usize = 200;

/// Known preference keys and their prompt descriptions.
const KNOWN_KEYS: &[(&str, &str)] = &[
    ("preferred_city", "用户所在城市"),
    ("music_preference", "音乐偏好"),
    ("wake_greeting", "唤醒问候语"),
    ("nickname", "用户昵称"),
    ("language", "首选语言"),
];

/// In-memory preference store keyed by device id.
#[derive(Default)]
pub struct PreferenceStore {
    prefs: DashMap<String, HashMap<String, String>>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a device's preferences (called on connect).
    pub fn load(&self, device_id: &str, prefs: HashMap<String, String>) {
        log::info!("[{}] Loaded {} preferences", device_id, prefs.len());
        self.prefs.insert(device_id.to_string(), prefs);
    }

    /// Returns a copy of a device's preferences.
    pub fn all(&self, device_id: &str) -> HashMap<String, String> {
        self.prefs
            .get(device_id)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// A single preference value.
    pub fn get(&self, device_id: &str, key: &str) -> Option<String> {
        self.prefs.get(device_id)?.get(key).cloned()
    }

    /// Sets a preference. Newlines are stripped and the value is capped
    /// at [`MAX_PREF_VALUE_LEN`] characters.
    pub fn set(&self, device_id: &str, key: &str, value: &str) {
        let sanitized: String = value
            .replace(['\n', '\r'], " ")
            .trim()
            .chars()
            .take(MAX_PREF_VALUE_LEN)
            .collect();
        log::info!("[{}] Preference set: {}={}", device_id, key, sanitized);
        self.prefs
            .entry(device_id.to_string())
            .or_default()
            .insert(key.to_string(), sanitized);
    }

    /// Drops a device's in-memory preferences (called on disconnect).
    pub fn clear(&self, device_id: &str) {
        self.prefs.remove(device_id);
    }

    /// Renders preferences as a system-prompt fragment, or an empty
    /// string when none are set.
    pub fn prompt_fragment(&self, device_id: &str) -> String {
        let Some(prefs) = self.prefs.get(device_id) else {
            return String::new();
        };
        if prefs.is_empty() {
            return String::new();
        }

        let descriptions: HashMap<&str, &str> = KNOWN_KEYS.iter().copied().collect();
        let mut lines: Vec<String> = prefs
            .iter()
            .map(|(key, value)| {
                let description = descriptions.get(key.as_str()).copied().unwrap_or(key);
                format!("- {description}: {value}")
            })
            .collect();
        lines.sort();
        format!("用户偏好设置：\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let store = PreferenceStore::new();
        store.set("dev-1", "nickname", "小明");
        assert_eq!(store.get("dev-1", "nickname").as_deref(), Some("小明"));
        assert_eq!(store.get("dev-2", "nickname"), None);
    }

    #[test]
    fn values_are_sanitized() {
        let store = PreferenceStore::new();
        store.set("dev-1", "wake_greeting", "  hello\nworld\r!  ");
        assert_eq!(
            store.get("dev-1", "wake_greeting").as_deref(),
            Some("hello world !")
        );

        let long = "x".repeat(500);
        store.set("dev-1", "nickname", &long);
        assert_eq!(store.get("dev-1", "nickname").unwrap().len(), 200);
    }

    #[test]
    fn prompt_fragment_empty_without_prefs() {
        let store = PreferenceStore::new();
        assert_eq!(store.prompt_fragment("dev-1"), "");
    }

    #[test]
    fn prompt_fragment_uses_known_key_descriptions() {
        let store = PreferenceStore::new();
        store.set("dev-1", "preferred_city", "上海");
        let fragment = store.prompt_fragment("dev-1");
        assert!(fragment.contains("用户所在城市: 上海"), "{fragment}");
    }

    #[test]
    fn clear_drops_device() {
        let store = PreferenceStore::new();
        store.set("dev-1", "nickname", "a");
        store.clear("dev-1");
        assert!(store.all("dev-1").is_empty());
    }
}
