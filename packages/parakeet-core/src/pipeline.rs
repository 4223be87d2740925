//! The per-request pipeline: decode → ASR → LLM → TTS → paced send.
//!
//! Runs as a detached task so the connection's message loop stays
//! responsive to `abort` while audio is streaming. Cooperative
//! cancellation (the session's abort flag) is observed at a checkpoint
//! between every stage and continuously inside the rate controller; hard
//! cancellation (task abort on disconnect) is handled by an RAII guard so
//! `processing` reverts on every path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::protocol::Outbound;
use crate::protocol_constants::KEEPALIVE_INTERVAL_SECS;
use crate::providers::{Responder, Synthesizer, Transcriber};
use crate::sender::OutboundSink;
use crate::session::Session;
use crate::stream::{decode_frames, AudioRateController};

/// Resets the processing flag when the pipeline ends, completes, errors,
/// or is hard-cancelled mid-await.
struct ProcessingGuard {
    session: Arc<Session>,
}

impl ProcessingGuard {
    fn engage(session: &Arc<Session>) -> Self {
        session.set_processing(true);
        Self {
            session: Arc::clone(session),
        }
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.session.set_processing(false);
    }
}

/// One request pipeline bound to the gateway's providers and audio params.
pub struct Pipeline {
    asr: Arc<dyn Transcriber>,
    tts: Arc<dyn Synthesizer>,
    llm: Arc<dyn Responder>,
    sample_rate: u32,
    channels: u16,
    frame_duration_ms: u32,
}

impl Pipeline {
    pub fn new(
        asr: Arc<dyn Transcriber>,
        tts: Arc<dyn Synthesizer>,
        llm: Arc<dyn Responder>,
        sample_rate: u32,
        channels: u16,
        frame_duration_ms: u32,
    ) -> Self {
        Self {
            asr,
            tts,
            llm,
            sample_rate,
            channels,
            frame_duration_ms,
        }
    }

    /// Drives one request end-to-end. Never panics on provider failure;
    /// errors are reported to the device and end only this request.
    pub async fn run(&self, sink: Arc<dyn OutboundSink>, session: Arc<Session>) {
        let sid = session.session_id.clone();

        let packets = session.take_audio();
        if packets.is_empty() {
            let _ = sink
                .send_json(
                    &Outbound::Error {
                        message: "empty audio".to_string(),
                    },
                    &sid,
                    "empty_audio",
                )
                .await;
            return;
        }

        let _processing = ProcessingGuard::engage(&session);
        let t0 = Instant::now();

        // Keepalive pings keep the congestion window open while the
        // (possibly long) provider calls run.
        let keepalive = tokio::spawn(keepalive_pings(
            Arc::clone(&sink),
            Arc::clone(&session),
        ));

        let result = self.synthesize_reply(&sink, &session, packets).await;

        keepalive.abort();
        let _ = keepalive.await;

        let Some((frames, reply)) = result else {
            log::info!("[{}] Pipeline total: {:.1}s", sid, t0.elapsed().as_secs_f32());
            return;
        };

        if !sink
            .send_json(&Outbound::TtsStart { text: reply }, &sid, "tts_start")
            .await
        {
            log::error!("[{}] Failed to send tts_start, aborting", sid);
            return;
        }

        let total = frames.len();
        let mut controller = AudioRateController::new(self.frame_duration_ms);
        controller.enqueue_all(frames);

        let send_sink = Arc::clone(&sink);
        let send_sid = sid.clone();
        let sent = controller
            .drain(
                move |frame| {
                    let sink = Arc::clone(&send_sink);
                    let sid = send_sid.clone();
                    async move { sink.send_audio(frame, &sid).await }
                },
                || session.abort_requested() || sink.is_closed(),
            )
            .await;

        if session.abort_requested() {
            // The abort ack already carried its own tts_end; a second
            // end marker must not follow.
            log::info!("[{}] TTS aborted: {}/{} frames", sid, sent, total);
        } else {
            let _ = sink.send_json(&Outbound::tts_end(), &sid, "tts_end").await;
            log::info!("[{}] TTS complete: {}/{} frames", sid, sent, total);
        }

        log::info!("[{}] Pipeline total: {:.1}s", sid, t0.elapsed().as_secs_f32());
    }

    fn interrupted(&self, session: &Session, sink: &Arc<dyn OutboundSink>) -> bool {
        session.abort_requested() || sink.is_closed()
    }

    async fn send_error(&self, sink: &Arc<dyn OutboundSink>, sid: &str, message: String) {
        let _ = sink
            .send_json(&Outbound::Error { message }, sid, "pipeline_error")
            .await;
    }

    /// Runs decode → ASR → LLM → TTS with an abort checkpoint between
    /// each stage. Returns the encoded reply frames and the reply text,
    /// or `None` when the request ended early (abort, empty transcript,
    /// or a reported error).
    async fn synthesize_reply(
        &self,
        sink: &Arc<dyn OutboundSink>,
        session: &Arc<Session>,
        packets: Vec<Bytes>,
    ) -> Option<(Vec<Bytes>, String)> {
        let sid = &session.session_id;
        log::info!("[{}] Pipeline start: {} opus frames", sid, packets.len());

        let t0 = Instant::now();
        let pcm = match decode_frames(&packets, self.sample_rate, self.channels) {
            Ok(pcm) => pcm,
            Err(e) => {
                log::error!("[{}] Opus decode failed: {}", sid, e);
                self.send_error(sink, sid, format!("Opus decode failed: {e}"))
                    .await;
                return None;
            }
        };
        log::info!(
            "[{}] Opus decode: {} frames -> {} samples ({:.2}s)",
            sid,
            packets.len(),
            pcm.len(),
            t0.elapsed().as_secs_f32()
        );

        if self.interrupted(session, sink) {
            log::info!("[{}] Aborted before ASR", sid);
            return None;
        }

        let user = session.config.read().clone();

        let t0 = Instant::now();
        let text = match self.asr.transcribe(&pcm, Some(&user)).await {
            Ok(text) => text,
            Err(e) => {
                log::error!("[{}] ASR failed: {}", sid, e);
                self.send_error(sink, sid, format!("ASR failed: {e}")).await;
                return None;
            }
        };
        log::info!("[{}] ASR: '{}' ({:.2}s)", sid, text, t0.elapsed().as_secs_f32());

        let _ = sink
            .send_json(
                &Outbound::AsrText { text: text.clone() },
                sid,
                "asr_text",
            )
            .await;

        if text.trim().is_empty() {
            log::info!("[{}] ASR empty, skipping LLM and TTS", sid);
            return None;
        }

        if self.interrupted(session, sink) {
            log::info!("[{}] Aborted before LLM", sid);
            return None;
        }

        let t0 = Instant::now();
        let reply = match self.llm.respond(&text, session, sink).await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("[{}] LLM failed: {}", sid, e);
                self.send_error(sink, sid, format!("LLM failed: {e}")).await;
                return None;
            }
        };
        log::info!(
            "[{}] LLM: '{}' ({:.2}s)",
            sid,
            reply,
            t0.elapsed().as_secs_f32()
        );

        if self.interrupted(session, sink) {
            log::info!("[{}] Aborted before TTS", sid);
            return None;
        }

        let t0 = Instant::now();
        let frames = match self.tts.synthesize(&reply, Some(&user)).await {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("[{}] TTS failed: {}", sid, e);
                self.send_error(sink, sid, format!("TTS failed: {e}")).await;
                return None;
            }
        };
        log::info!(
            "[{}] TTS: {} frames ({:.2}s)",
            sid,
            frames.len(),
            t0.elapsed().as_secs_f32()
        );

        if self.interrupted(session, sink) {
            log::info!("[{}] Aborted before stream", sid);
            return None;
        }

        Some((frames, reply))
    }
}

/// Emits a protocol-level ping every second while the socket is open and
/// no abort is pending. Cancelled by the pipeline on exit.
async fn keepalive_pings(sink: Arc<dyn OutboundSink>, session: Arc<Session>) {
    loop {
        tokio::time::sleep(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)).await;
        if sink.is_closed() || session.abort_requested() {
            break;
        }
        if !sink.send_ping(&session.session_id).await {
            break;
        }
        log::debug!("[{}] Keepalive ping sent", session.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::extract::ws::Message;

    use crate::providers::{ProviderError, ProviderResult};
    use crate::sender::test_support::RecordingSink;
    use crate::session::UserConfig;
    use crate::stream::encode_frames;

    struct StubAsr {
        text: String,
        /// Raised on the session right after transcription, to exercise
        /// the checkpoint between ASR and LLM.
        abort_after: Option<Arc<Session>>,
    }

    #[async_trait]
    impl Transcriber for StubAsr {
        async fn transcribe(
            &self,
            _pcm: &[i16],
            _user: Option<&UserConfig>,
        ) -> ProviderResult<String> {
            if let Some(session) = &self.abort_after {
                session.request_abort();
            }
            Ok(self.text.clone())
        }
    }

    struct StubLlm {
        reply: String,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Responder for StubLlm {
        async fn respond(
            &self,
            _text: &str,
            _session: &Arc<Session>,
            _sink: &Arc<dyn OutboundSink>,
        ) -> ProviderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Malformed("stub failure".into()));
            }
            Ok(self.reply.clone())
        }
    }

    struct StubTts {
        frames: usize,
    }

    #[async_trait]
    impl Synthesizer for StubTts {
        async fn synthesize(
            &self,
            _text: &str,
            _user: Option<&UserConfig>,
        ) -> ProviderResult<Vec<Bytes>> {
            Ok((0..self.frames)
                .map(|i| Bytes::from(vec![i as u8; 8]))
                .collect())
        }
    }

    /// Sink that raises the session abort flag after N audio frames, the
    /// way a device `abort` message lands mid-stream.
    struct AbortAfterFrames {
        inner: RecordingSink,
        session: Arc<Session>,
        after: usize,
        sent: AtomicUsize,
    }

    #[async_trait]
    impl OutboundSink for AbortAfterFrames {
        async fn send_frame(&self, frame: Message, session_id: &str, label: &str) -> bool {
            let is_audio = matches!(frame, Message::Binary(_));
            let ok = self.inner.send_frame(frame, session_id, label).await;
            if is_audio && self.sent.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.session.request_abort();
            }
            ok
        }

        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }

        fn mark_closed(&self) {
            self.inner.mark_closed();
        }
    }

    fn pipeline(asr: StubAsr, llm: StubLlm, tts: StubTts) -> Pipeline {
        Pipeline::new(
            Arc::new(asr),
            Arc::new(tts),
            Arc::new(llm),
            16_000,
            1,
            60,
        )
    }

    fn session_with_audio(frames: usize) -> Arc<Session> {
        let session = Arc::new(Session::new("dev-1"));
        session.start_listening();
        let pcm = vec![0i16; 960 * frames];
        for packet in encode_frames(&pcm, 16_000, 1).unwrap() {
            session.push_audio(packet);
        }
        session.stop_listening();
        session
    }

    fn message_types(texts: &[String]) -> Vec<String> {
        texts
            .iter()
            .map(|t| {
                serde_json::from_str::<serde_json::Value>(t).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_emits_full_sequence() {
        let p = pipeline(
            StubAsr {
                text: "今天天气怎么样".into(),
                abort_after: None,
            },
            StubLlm {
                reply: "晴天".into(),
                calls: AtomicUsize::new(0),
                fail: false,
            },
            StubTts { frames: 3 },
        );
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::new());
        let session = session_with_audio(10);

        p.run(sink.clone() as Arc<dyn OutboundSink>, Arc::clone(&session))
            .await;

        let types = message_types(&sink.texts());
        assert_eq!(types, vec!["asr_text", "tts_start", "tts_end"]);
        assert_eq!(sink.binary_count(), 3);
        assert!(!session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_reports_error_without_processing() {
        let p = pipeline(
            StubAsr {
                text: "ignored".into(),
                abort_after: None,
            },
            StubLlm {
                reply: "ignored".into(),
                calls: AtomicUsize::new(0),
                fail: false,
            },
            StubTts { frames: 1 },
        );
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::new());
        let session = Arc::new(Session::new("dev-1"));

        p.run(sink.clone() as Arc<dyn OutboundSink>, Arc::clone(&session))
            .await;

        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("empty audio"));
        assert!(!session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_skips_llm_and_tts() {
        let llm = Arc::new(StubLlm {
            reply: "ignored".into(),
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let p = Pipeline::new(
            Arc::new(StubAsr {
                text: String::new(),
                abort_after: None,
            }),
            Arc::new(StubTts { frames: 1 }),
            llm.clone(),
            16_000,
            1,
            60,
        );
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::new());
        let session = session_with_audio(10);

        p.run(sink.clone() as Arc<dyn OutboundSink>, session).await;

        let types = message_types(&sink.texts());
        assert_eq!(types, vec!["asr_text"], "no tts_start, no tts_end");
        assert_eq!(sink.binary_count(), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "LLM must not be called");
    }

    #[tokio::test(start_paused = true)]
    async fn abort_at_checkpoint_prevents_llm_call() {
        let session = session_with_audio(10);
        let llm = Arc::new(StubLlm {
            reply: "ignored".into(),
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let p = Pipeline::new(
            Arc::new(StubAsr {
                text: "hello".into(),
                abort_after: Some(Arc::clone(&session)),
            }),
            Arc::new(StubTts { frames: 5 }),
            llm.clone(),
            16_000,
            1,
            60,
        );
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::new());

        p.run(sink.clone() as Arc<dyn OutboundSink>, Arc::clone(&session))
            .await;

        let types = message_types(&sink.texts());
        assert_eq!(types, vec!["asr_text"], "aborted before LLM");
        assert_eq!(sink.binary_count(), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "LLM must not be called");
        assert!(!session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn llm_failure_reports_error_and_ends_request() {
        let p = pipeline(
            StubAsr {
                text: "hello".into(),
                abort_after: None,
            },
            StubLlm {
                reply: String::new(),
                calls: AtomicUsize::new(0),
                fail: true,
            },
            StubTts { frames: 1 },
        );
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::new());
        let session = session_with_audio(10);

        p.run(sink.clone() as Arc<dyn OutboundSink>, Arc::clone(&session))
            .await;

        let types = message_types(&sink.texts());
        assert_eq!(types, vec!["asr_text", "error"]);
        assert_eq!(sink.binary_count(), 0);
        assert!(!session.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_mid_stream_stops_audio_and_skips_end_marker() {
        let session = session_with_audio(10);
        let sink = Arc::new(AbortAfterFrames {
            inner: RecordingSink::new(),
            session: Arc::clone(&session),
            after: 5,
            sent: AtomicUsize::new(0),
        });
        let p = pipeline(
            StubAsr {
                text: "讲个故事".into(),
                abort_after: None,
            },
            StubLlm {
                reply: "从前有座山".into(),
                calls: AtomicUsize::new(0),
                fail: false,
            },
            StubTts { frames: 50 },
        );

        p.run(sink.clone() as Arc<dyn OutboundSink>, Arc::clone(&session))
            .await;

        let types = message_types(&sink.inner.texts());
        assert_eq!(
            types,
            vec!["asr_text", "tts_start"],
            "no tts_end after an abort"
        );
        let sent = sink.inner.binary_count();
        assert!(sent >= 5 && sent <= 6, "stream must stop promptly, sent {sent}");
        assert!(!session.is_processing());
    }
}
