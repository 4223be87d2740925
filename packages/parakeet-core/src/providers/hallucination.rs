//! Spurious-transcript filter.
//!
//! Speech recognizers fed silence or noise emit a small, stable set of
//! filler phrases (mostly video-platform boilerplate from their training
//! data). Matching transcripts are replaced with the empty string so the
//! pipeline skips the LLM and TTS stages.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Trailing punctuation stripped before the exact-match check.
const TRAILING_PUNCT: &[char] = &['.', '!', '?', ',', '。', '！', '？', '，'];

/// Short phrases recognizers emit verbatim on silence. Matched exactly
/// after normalization.
const EXACT_PHRASES: &[&str] = &[
    // English
    "thank you",
    "thank you for watching",
    "thanks for watching",
    "thanks",
    "bye",
    "goodbye",
    "all right",
    "you",
    "the end",
    "subscribe",
    "like and subscribe",
    "see you next time",
    "so",
    "okay",
    "yeah",
    "yes",
    "no",
    "hmm",
    "uh",
    // Chinese
    "谢谢观看",
    "感谢观看",
    "请订阅",
    "点赞",
    "订阅",
    "谢谢大家",
    "谢谢",
    "再见",
    "好的",
    "嗯",
    "字幕",
    "字幕由",
    "字幕提供",
];

/// Longer boilerplate fragments matched as substrings of the lowercased
/// transcript.
const SUBSTRING_PATTERNS: &[&str] = &[
    "点赞",
    "订阅",
    "转发",
    "打赏",
    "关注",
    "字幕由",
    "字幕提供",
    "subtitles by",
    "thank you for watching",
    "thanks for watching",
    "like and subscribe",
    "明镜",
    "栏目",
    "支持明镜",
    "请不吝",
    "视频来源",
];

fn exact_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| EXACT_PHRASES.iter().copied().collect())
}

/// Whether a transcript is a known spurious recognizer output.
pub fn is_hallucination(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let normalized = lowered.trim_end_matches(TRAILING_PUNCT);
    if exact_set().contains(normalized) {
        return true;
    }
    SUBSTRING_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Replaces known spurious transcripts with the empty string, passing
/// genuine speech through unchanged.
pub fn filter_transcript(text: String) -> String {
    if is_hallucination(&text) {
        log::warn!("[ASR] Filtered hallucination: '{}'", text);
        String::new()
    } else {
        text
    }
}
