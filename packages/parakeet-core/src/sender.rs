//! Timeout-bounded outbound socket writes.
//!
//! Every write to a device socket goes through [`OutboundSink::send_frame`],
//! which enforces a hard deadline and reports failure as a plain `bool`.
//! The boolean is the only failure signal the streaming layers use to
//! decide whether to keep going; a stalled hotspot link must surface as a
//! quick `false`, never as a wedged future.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::protocol::Outbound;
use crate::protocol_constants::SEND_TIMEOUT_SECS;

/// A destination for outbound socket frames.
///
/// The pipeline, the rate controller, the tools, and the reminder
/// scheduler all write through this seam, so tests can collect frames
/// without a live socket.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Attempts to write one frame within the send deadline.
    /// Returns `true` on confirmed write, `false` on timeout or error.
    async fn send_frame(&self, frame: Message, session_id: &str, label: &str) -> bool;

    /// Whether the underlying socket is known to be unusable.
    fn is_closed(&self) -> bool;

    /// Latches the closed state (called by the reader loop on disconnect).
    fn mark_closed(&self);

    /// Serializes and sends a protocol message.
    async fn send_json(&self, message: &Outbound, session_id: &str, label: &str) -> bool {
        self.send_frame(Message::Text(message.to_json().into()), session_id, label)
            .await
    }

    /// Sends one opaque audio frame.
    async fn send_audio(&self, frame: bytes::Bytes, session_id: &str) -> bool {
        self.send_frame(Message::Binary(frame), session_id, "audio")
            .await
    }

    /// Sends a protocol-level keepalive ping.
    async fn send_ping(&self, session_id: &str) -> bool {
        self.send_frame(Message::Ping(bytes::Bytes::new()), session_id, "keepalive")
            .await
    }
}

/// Write half of a device WebSocket with bounded sends.
pub struct WsSender {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsSender {
    /// Wraps the write half of an accepted socket.
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Sends a close frame with the given code and reason, then latches
    /// the closed state. Failures are ignored; the peer may already be gone.
    pub async fn close(&self, code: u16, reason: &'static str) {
        let frame = Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        }));
        let mut sink = self.sink.lock().await;
        let _ = timeout(Duration::from_secs(SEND_TIMEOUT_SECS), sink.send(frame)).await;
        self.mark_closed();
    }
}

#[async_trait]
impl OutboundSink for WsSender {
    async fn send_frame(&self, frame: Message, session_id: &str, label: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut sink = self.sink.lock().await;
        match timeout(Duration::from_secs(SEND_TIMEOUT_SECS), sink.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::warn!("[{}] send failed ({}): {}", session_id, label, e);
                self.mark_closed();
                false
            }
            Err(_) => {
                log::error!(
                    "[{}] send timed out ({}s) ({})",
                    session_id,
                    SEND_TIMEOUT_SECS,
                    label
                );
                false
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
