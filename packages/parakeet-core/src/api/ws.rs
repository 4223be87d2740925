//! Device WebSocket handler: authentication, message routing, and
//! connection lifecycle.
//!
//! The handler owns the socket's read half and all structural session
//! mutation. Pipelines run as detached tasks so the loop stays responsive
//! to `abort` while a reply is streaming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::StreamExt;

use crate::api::AppState;
use crate::protocol::{AudioParams, Features, Inbound, ListenState, Outbound};
use crate::protocol_constants::{CLOSE_CODE_AUTH, PIPELINE_SHUTDOWN_GRACE_SECS};
use crate::sender::{OutboundSink, WsSender};
use crate::session::Session;

/// Upgrade endpoint. Credentials ride on the opening request headers.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let device_id = header_value(&headers, "x-device-id");
    let token = header_value(&headers, "x-device-token");
    ws.on_upgrade(move |socket| handle_socket(socket, state, device_id, token))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    device_id: Option<String>,
    token: Option<String>,
) {
    let (write, mut read) = socket.split();
    let sender = Arc::new(WsSender::new(write));

    // ── Authentication ───────────────────────────────────────────────────
    let Some((device_id, token)) = device_id.zip(token) else {
        log::warn!("[WS] Connection without credentials");
        let _ = sender
            .send_json(
                &Outbound::Error {
                    message: "missing device_id/token".to_string(),
                },
                "-",
                "auth",
            )
            .await;
        sender.close(CLOSE_CODE_AUTH, "missing credentials").await;
        return;
    };

    if !state.devices.is_valid(&device_id, &token) {
        log::warn!("[WS] Invalid token for device {}", device_id);
        let _ = sender
            .send_json(
                &Outbound::Error {
                    message: "invalid token".to_string(),
                },
                "-",
                "auth",
            )
            .await;
        sender.close(CLOSE_CODE_AUTH, "invalid token").await;
        return;
    }

    // ── Session setup ────────────────────────────────────────────────────
    let session = Arc::new(Session::new(device_id.clone()));
    log::info!(
        "[{}] Device {} authenticated, session started",
        session.session_id,
        device_id
    );

    state
        .connections
        .insert(sender.clone() as Arc<dyn OutboundSink>, Arc::clone(&session));
    state.preferences.load(&device_id, HashMap::new());

    // ── Message loop ─────────────────────────────────────────────────────
    while let Some(message) = read.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                log::info!("[{}] Socket error: {}", session.session_id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => {
                session.touch();
                handle_text(&state, &sender, &session, text.as_str()).await;
            }
            Message::Binary(frame) => {
                // Dropped silently unless listening.
                if session.push_audio(frame) {
                    session.touch();
                }
            }
            Message::Close(_) => {
                log::info!("[{}] Device {} disconnected", session.session_id, device_id);
                break;
            }
            // Protocol pings/pongs are handled by the socket layer.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────
    sender.mark_closed();
    session.request_abort();

    if let Some(mut task) = session.take_process_task() {
        if !task.is_finished() {
            log::info!("[{}] Waiting for pipeline to finish...", session.session_id);
            let grace = Duration::from_secs(PIPELINE_SHUTDOWN_GRACE_SECS);
            match tokio::time::timeout(grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("[{}] Pipeline task failed: {}", session.session_id, e);
                }
                Err(_) => {
                    task.abort();
                    log::warn!("[{}] Force-cancelled pipeline", session.session_id);
                }
            }
        }
    }

    state.history.clear(&session.session_id);
    state.preferences.clear(&device_id);
    state.connections.remove(&device_id, &session.session_id);
    log::info!(
        "[{}] Session ended for device {}",
        session.session_id,
        device_id
    );
}

/// Routes one inbound JSON message.
async fn handle_text(
    state: &AppState,
    sender: &Arc<WsSender>,
    session: &Arc<Session>,
    text: &str,
) {
    let sid = &session.session_id;

    let message: Inbound = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[{}] Unparseable message: {}", sid, e);
            let _ = sender
                .send_json(
                    &Outbound::Error {
                        message: "invalid message".to_string(),
                    },
                    sid,
                    "protocol_error",
                )
                .await;
            return;
        }
    };

    match message {
        Inbound::Hello { listen_mode } => {
            if let Some(mode) = listen_mode {
                log::info!("[{}] Protocol v2, listen_mode={}", sid, mode);
                session.set_listen_mode(mode);
            }
            let reply = Outbound::Hello {
                session_id: session.session_id.clone(),
                audio_params: AudioParams {
                    sample_rate: state.config.pcm_sample_rate,
                    channels: state.config.pcm_channels,
                    codec: "opus",
                    frame_duration_ms: state.config.frame_duration_ms,
                },
                features: Features::default(),
                version: session.protocol_version(),
            };
            let _ = sender.send_json(&reply, sid, "hello").await;
            log::info!("[{}] Hello handshake complete", sid);
        }

        Inbound::AudioStart => {
            session.start_listening();
        }

        Inbound::AudioEnd => {
            session.stop_listening();
            launch_pipeline(state, sender, session);
        }

        Inbound::Listen {
            state: listen_state,
            mode,
            text,
        } => match listen_state {
            ListenState::Detect => {
                log::info!("[{}] Wake detected: text={:?}", sid, text);
            }
            ListenState::Start => {
                if let Some(mode) = mode {
                    session.update_listen_mode(mode);
                }
                session.start_listening();
                log::info!("[{}] Listen start (mode={:?})", sid, session.listen_mode());
            }
            ListenState::Stop => {
                session.stop_listening();
                log::info!("[{}] Listen stop, launching pipeline", sid);
                launch_pipeline(state, sender, session);
            }
        },

        Inbound::Abort { reason } => {
            log::info!(
                "[{}] Abort requested (reason={})",
                sid,
                reason.as_deref().unwrap_or("unknown")
            );
            session.request_abort();
            let _ = sender
                .send_json(&Outbound::tts_end_abort(), sid, "abort_ack")
                .await;
        }

        Inbound::Ping => {
            let _ = sender.send_json(&Outbound::Pong, sid, "pong").await;
        }
    }
}

/// Launches the pipeline as a detached task.
///
/// At most one pipeline runs per session: a launch while one is active is
/// ignored, and a stale finished-but-untracked handle is cancelled first.
fn launch_pipeline(state: &AppState, sender: &Arc<WsSender>, session: &Arc<Session>) {
    let sid = &session.session_id;

    if session.is_processing() {
        log::warn!("[{}] Already processing, ignoring new request", sid);
        return;
    }

    if let Some(previous) = session.take_process_task() {
        if !previous.is_finished() {
            log::warn!("[{}] Cancelling previous pipeline task", sid);
            previous.abort();
        }
    }

    let pipeline = Arc::clone(&state.pipeline);
    let sink: Arc<dyn OutboundSink> = sender.clone();
    let task_session = Arc::clone(session);
    let handle = tokio::spawn(async move {
        pipeline.run(sink, task_session).await;
    });
    session.replace_process_task(handle);
}
