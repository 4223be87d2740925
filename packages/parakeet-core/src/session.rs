//! Per-connection session state.
//!
//! One [`Session`] exists per open device socket. The connection handler's
//! task owns all structural mutation; the flag fields are atomics because
//! the pipeline task and the reminder scheduler read them concurrently
//! (cooperative abort, busy checks).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-user provider overrides, loaded on connect from the account the
/// device is bound to. Empty fields fall back to the global defaults at
/// each provider call.
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub user_id: i64,
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub asr_model: String,
    pub tts_model: String,
    pub tts_voice: String,
}

impl UserConfig {
    /// Whether this user brings their own provider credentials.
    pub fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Returns `value` unless it is empty, in which case `default`.
    pub fn pick<'a>(value: &'a str, default: &'a str) -> &'a str {
        if value.is_empty() {
            default
        } else {
            value
        }
    }
}

/// Live state for one device connection.
pub struct Session {
    /// Opaque device identifier from the auth headers.
    pub device_id: String,
    /// Short identifier emitted on every log line for correlation.
    pub session_id: String,
    /// Per-user provider overrides.
    pub config: RwLock<UserConfig>,

    /// Opus frames buffered while listening.
    opus_packets: Mutex<Vec<Bytes>>,

    listening: AtomicBool,
    processing: AtomicBool,
    tts_abort: AtomicBool,
    music_playing: AtomicBool,
    music_paused: AtomicBool,
    meeting_active: AtomicBool,

    listen_mode: RwLock<Option<String>>,
    protocol_version: AtomicU8,

    first_activity: Instant,
    last_activity: Mutex<Instant>,

    /// Handle to the running pipeline task, if any.
    process_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Creates a fresh session for an authenticated device.
    pub fn new(device_id: impl Into<String>) -> Self {
        let now = Instant::now();
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        Self {
            device_id: device_id.into(),
            session_id,
            config: RwLock::new(UserConfig::default()),
            opus_packets: Mutex::new(Vec::new()),
            listening: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            tts_abort: AtomicBool::new(false),
            music_playing: AtomicBool::new(false),
            music_paused: AtomicBool::new(false),
            meeting_active: AtomicBool::new(false),
            listen_mode: RwLock::new(None),
            protocol_version: AtomicU8::new(1),
            first_activity: now,
            last_activity: Mutex::new(now),
            process_task: Mutex::new(None),
        }
    }

    // ── Activity tracking ────────────────────────────────────────────────

    /// Updates the last-activity timestamp.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Seconds since the last activity.
    pub fn idle_seconds(&self) -> f64 {
        self.last_activity.lock().elapsed().as_secs_f64()
    }

    /// Seconds since the session was created.
    pub fn age_seconds(&self) -> f64 {
        self.first_activity.elapsed().as_secs_f64()
    }

    // ── Audio buffer ─────────────────────────────────────────────────────

    /// Appends a binary frame if the session is listening.
    /// Returns whether the frame was accepted.
    pub fn push_audio(&self, frame: Bytes) -> bool {
        if !self.is_listening() {
            return false;
        }
        self.opus_packets.lock().push(frame);
        true
    }

    /// Takes the buffered frames, leaving the buffer empty.
    pub fn take_audio(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.opus_packets.lock())
    }

    /// Number of buffered frames.
    pub fn buffered_frames(&self) -> usize {
        self.opus_packets.lock().len()
    }

    /// Clears the buffer and enters the listening state.
    /// A new utterance also clears any stale abort flag.
    pub fn start_listening(&self) {
        self.opus_packets.lock().clear();
        self.tts_abort.store(false, Ordering::Release);
        self.listening.store(true, Ordering::Release);
    }

    /// Leaves the listening state; buffered frames stay for the pipeline.
    pub fn stop_listening(&self) {
        self.listening.store(false, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    // ── Pipeline coordination ────────────────────────────────────────────

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::Release);
    }

    /// Raises the cooperative abort flag.
    pub fn request_abort(&self) {
        self.tts_abort.store(true, Ordering::Release);
    }

    pub fn abort_requested(&self) -> bool {
        self.tts_abort.load(Ordering::Acquire)
    }

    /// Stores the handle of a newly launched pipeline task, returning the
    /// previous handle if one was still tracked.
    pub fn replace_process_task(&self, handle: JoinHandle<()>) -> Option<JoinHandle<()>> {
        self.process_task.lock().replace(handle)
    }

    /// Takes the tracked pipeline task handle, if any.
    pub fn take_process_task(&self) -> Option<JoinHandle<()>> {
        self.process_task.lock().take()
    }

    // ── Coarse activity flags ────────────────────────────────────────────

    pub fn music_playing(&self) -> bool {
        self.music_playing.load(Ordering::Acquire)
    }

    pub fn set_music_playing(&self, value: bool) {
        self.music_playing.store(value, Ordering::Release);
    }

    pub fn music_paused(&self) -> bool {
        self.music_paused.load(Ordering::Acquire)
    }

    pub fn set_music_paused(&self, value: bool) {
        self.music_paused.store(value, Ordering::Release);
    }

    pub fn meeting_active(&self) -> bool {
        self.meeting_active.load(Ordering::Acquire)
    }

    pub fn set_meeting_active(&self, value: bool) {
        self.meeting_active.store(value, Ordering::Release);
    }

    // ── Handshake ────────────────────────────────────────────────────────

    /// Stores the listen mode negotiated in the handshake and bumps the
    /// protocol version.
    pub fn set_listen_mode(&self, mode: impl Into<String>) {
        *self.listen_mode.write() = Some(mode.into());
        self.protocol_version.store(2, Ordering::Release);
    }

    /// Updates the listen mode mid-connection without renegotiating the
    /// protocol version.
    pub fn update_listen_mode(&self, mode: impl Into<String>) {
        *self.listen_mode.write() = Some(mode.into());
    }

    pub fn listen_mode(&self) -> Option<String> {
        self.listen_mode.read().clone()
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version.load(Ordering::Acquire)
    }
}
