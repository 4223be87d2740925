//! Real-time pacing for outbound audio.
//!
//! Bursting a whole reply at once overflows the TCP congestion window on
//! low-bandwidth last-mile links (phone hotspots), so the controller sends
//! one frame per frame duration. At 60 ms per ~180-byte Opus frame the
//! outbound rate is about 3 KB/s.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{sleep_until, Instant};

use crate::protocol_constants::MAX_CONSECUTIVE_SEND_ERRORS;

/// Paces a finite sequence of opaque audio frames at playback cadence.
pub struct AudioRateController {
    frame_duration: Duration,
    queue: VecDeque<Bytes>,
}

impl AudioRateController {
    /// Creates a controller sending one frame every `frame_duration_ms`.
    pub fn new(frame_duration_ms: u32) -> Self {
        Self {
            frame_duration: Duration::from_millis(u64::from(frame_duration_ms)),
            queue: VecDeque::new(),
        }
    }

    /// Queues one frame for rate-controlled sending.
    pub fn enqueue(&mut self, frame: Bytes) {
        self.queue.push_back(frame);
    }

    /// Queues multiple frames.
    pub fn enqueue_all(&mut self, frames: impl IntoIterator<Item = Bytes>) {
        self.queue.extend(frames);
    }

    /// Number of frames still queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Sends all queued frames at playback rate.
    ///
    /// Deadlines are computed from the drain start plus the frame's
    /// position in the drained sequence, independent of send outcomes, so
    /// a single delayed write never pushes later deadlines out: the next
    /// frame fires immediately on return and the stream catches up.
    ///
    /// `send_fn` reports per-frame success; after
    /// [`MAX_CONSECUTIVE_SEND_ERRORS`] consecutive failures the drain
    /// stops. `abort_fn` is evaluated before every send.
    ///
    /// Returns the number of frames successfully sent.
    pub async fn drain<S, Fut, A>(&mut self, mut send_fn: S, abort_fn: A) -> usize
    where
        S: FnMut(Bytes) -> Fut,
        Fut: Future<Output = bool>,
        A: Fn() -> bool,
    {
        let total = self.queue.len();
        if total == 0 {
            return 0;
        }

        let start = Instant::now();
        let mut sent: usize = 0;
        // 0-indexed position of the next frame in the drained sequence.
        // Failed sends still advance it, keeping the cadence positional.
        let mut index: u32 = 0;
        let mut consecutive_errors: u32 = 0;

        while !self.queue.is_empty() {
            if abort_fn() {
                log::info!("[Rate] Aborted at {}/{}", sent, total);
                break;
            }

            // Positional deadline; already-elapsed deadlines return at once.
            let target = start + self.frame_duration * index;
            sleep_until(target).await;

            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            index += 1;

            if send_fn(frame).await {
                sent += 1;
                consecutive_errors = 0;
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_SEND_ERRORS {
                    log::error!(
                        "[Rate] {} consecutive send errors at {}/{}, stopping",
                        consecutive_errors,
                        sent,
                        total
                    );
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        log::info!(
            "[Rate] Sent {}/{} frames in {:.1}s (nominal {:.1}s)",
            sent,
            total,
            elapsed.as_secs_f32(),
            (total as u32 * self.frame_duration).as_secs_f32(),
        );
        sent
    }
}
