//! Wire messages exchanged with devices over the WebSocket.
//!
//! Text frames carry one JSON object each, discriminated by a `type`
//! field. Binary frames are opaque Opus packets and never appear here.

use serde::{Deserialize, Serialize};

/// Incoming text message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Handshake. A `listen_mode` field opts the device into protocol v2.
    Hello {
        #[serde(default)]
        listen_mode: Option<String>,
    },
    /// Begin buffering binary audio frames.
    AudioStart,
    /// Stop buffering and run the request pipeline.
    AudioEnd,
    /// v2 combined listening control.
    Listen {
        state: ListenState,
        #[serde(default)]
        mode: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    /// Cooperative cancellation of the current reply.
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Application-level liveness probe.
    Ping,
}

/// States of the v2 `listen` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Start,
    Stop,
    Detect,
}

/// Outgoing text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Hello {
        session_id: String,
        audio_params: AudioParams,
        features: Features,
        version: u8,
    },
    AsrText {
        text: String,
    },
    TtsStart {
        text: String,
    },
    TtsEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<&'static str>,
    },
    Error {
        message: String,
    },
    Pong,
    /// Device volume control pushed by the volume tool.
    Volume {
        level: u8,
    },
}

impl Outbound {
    /// End-of-reply marker for a normally completed stream.
    pub fn tts_end() -> Self {
        Self::TtsEnd { reason: None }
    }

    /// End-of-reply marker acknowledging a device-requested abort.
    pub fn tts_end_abort() -> Self {
        Self::TtsEnd {
            reason: Some("abort"),
        }
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// Serialization of these variants cannot fail; a formatting error
    /// would be a programming bug, surfaced as an empty error object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialize"}"#.to_string())
    }
}

/// Negotiated audio parameters advertised in the hello reply.
#[derive(Debug, Clone, Serialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: &'static str,
    pub frame_duration_ms: u32,
}

/// Capability flags advertised in the hello reply.
#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub asr: bool,
    pub tts: bool,
    pub llm: bool,
    pub abort: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            asr: true,
            tts: true,
            llm: true,
            abort: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_with_listen_mode() {
        let msg: Inbound =
            serde_json::from_str(r#"{"type":"hello","listen_mode":"manual"}"#).unwrap();
        match msg {
            Inbound::Hello { listen_mode } => assert_eq!(listen_mode.as_deref(), Some("manual")),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_listen_states() {
        let msg: Inbound =
            serde_json::from_str(r#"{"type":"listen","state":"detect","text":"hi tony"}"#).unwrap();
        match msg {
            Inbound::Listen { state, text, .. } => {
                assert_eq!(state, ListenState::Detect);
                assert_eq!(text.as_deref(), Some("hi tony"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(serde_json::from_str::<Inbound>(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn tts_end_omits_reason_when_normal() {
        assert_eq!(Outbound::tts_end().to_json(), r#"{"type":"tts_end"}"#);
        assert_eq!(
            Outbound::tts_end_abort().to_json(),
            r#"{"type":"tts_end","reason":"abort"}"#
        );
    }

    #[test]
    fn pong_serializes_bare() {
        assert_eq!(Outbound::Pong.to_json(), r#"{"type":"pong"}"#);
    }
}
