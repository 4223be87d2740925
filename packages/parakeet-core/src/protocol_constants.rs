//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the device wire protocol and the audio
//! format the firmware ships with; changing them would break deployed
//! devices.

// ─────────────────────────────────────────────────────────────────────────────
// Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// PCM sample rate used on both legs of the socket (Hz).
///
/// Devices capture and play back 16 kHz mono; every Opus frame on the wire
/// encodes audio at this rate.
pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// Number of audio channels (mono microphone devices).
pub const PCM_CHANNELS: u16 = 1;

/// Duration of one Opus frame (ms).
///
/// At 16 kHz this corresponds to [`FRAME_SAMPLES`] samples. 60 ms keeps the
/// paced outbound rate near 3 KB/s with ~180-byte frames.
pub const FRAME_DURATION_MS: u32 = 60;

/// Samples per Opus frame at [`PCM_SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 960;

/// Outbound Opus bitrate (bits/s). Speech stays intelligible at 24 kbps.
pub const OPUS_BITRATE: i32 = 24_000;

/// Sample rate of PCM returned by the speech-synthesis provider (Hz).
pub const TTS_PROVIDER_SAMPLE_RATE: u32 = 24_000;

// ─────────────────────────────────────────────────────────────────────────────
// Socket Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Close code sent when device authentication fails.
pub const CLOSE_CODE_AUTH: u16 = 4401;

/// Deadline for a single outbound socket write (seconds).
///
/// A stalled last-mile link must be detected quickly so the streaming loop
/// bails instead of wedging on congestion.
pub const SEND_TIMEOUT_SECS: u64 = 2;

/// Interval between keepalive pings while a pipeline is running (seconds).
pub const KEEPALIVE_INTERVAL_SECS: u64 = 1;

/// Consecutive failed sends before the rate controller gives up.
pub const MAX_CONSECUTIVE_SEND_ERRORS: u32 = 3;

/// Grace period for a pipeline task to observe the abort flag before it is
/// force-cancelled on disconnect (seconds).
pub const PIPELINE_SHUTDOWN_GRACE_SECS: u64 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Recordings shorter than this are dropped before recognition (seconds).
/// Usually accidental triggers or noise.
pub const MIN_ASR_DURATION_SECS: f32 = 0.5;

/// Maximum per-user provider clients kept in the LRU pool.
pub const CLIENT_POOL_CAPACITY: usize = 20;

/// Rolling conversation window sent to the chat endpoint (turns).
pub const HISTORY_MAX_TURNS: usize = 20;

/// Timeout for provider HTTP calls (seconds).
pub const PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Timeout for opening/closing the streaming-ASR WebSocket (seconds).
pub const ASR_SOCKET_TIMEOUT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Reminder Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Delay before the scheduler's first cycle, so the server finishes
/// binding and devices reconnect first (seconds).
pub const SCHEDULER_STARTUP_DELAY_SECS: u64 = 5;

/// Period between reminder-store scans (seconds).
pub const SCHEDULER_CHECK_INTERVAL_SECS: u64 = 30;

/// A pending reminder that cannot be delivered for this long is marked
/// failed-expired instead of retrying forever (seconds).
pub const REMINDER_EXPIRY_SECS: i64 = 3_600;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the health endpoint.
///
/// Deployment probes expect this exact string to identify a running
/// Parakeet gateway.
pub const SERVICE_ID: &str = "parakeet-gateway";
