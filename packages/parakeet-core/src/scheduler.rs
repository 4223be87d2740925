//! Background reminder delivery.
//!
//! A single long-lived task scans the reminder store every 30 seconds and
//! pushes due reminders into live sessions through the same TTS and
//! paced-send path the pipeline uses. Exactly one gateway process per
//! database is assumed; there is no row locking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayResult;
use crate::protocol::Outbound;
use crate::protocol_constants::{
    REMINDER_EXPIRY_SECS, SCHEDULER_CHECK_INTERVAL_SECS, SCHEDULER_STARTUP_DELAY_SECS,
};
use crate::providers::Synthesizer;
use crate::recurrence::next_occurrence;
use crate::registry::ConnectionRegistry;
use crate::sender::OutboundSink;
use crate::session::Session;
use crate::store::{Reminder, ReminderStore};
use crate::stream::AudioRateController;

/// Whether a session is too busy to be interrupted by a reminder.
/// Deferred reminders stay pending and retry next cycle.
fn session_busy(session: &Session) -> bool {
    session.is_processing() || session.is_listening() || session.music_playing()
}

/// The reminder delivery loop.
pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    connections: Arc<ConnectionRegistry>,
    tts: Arc<dyn Synthesizer>,
    frame_duration_ms: u32,
    cancel: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<ReminderStore>,
        connections: Arc<ConnectionRegistry>,
        tts: Arc<dyn Synthesizer>,
        frame_duration_ms: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            connections,
            tts,
            frame_duration_ms,
            cancel,
        }
    }

    /// Runs until cancelled. Startup is delayed so the server finishes
    /// binding and devices reconnect before the first scan.
    pub async fn run(self) {
        log::info!(
            "[Scheduler] Started (interval {}s)",
            SCHEDULER_CHECK_INTERVAL_SECS
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = sleep(Duration::from_secs(SCHEDULER_STARTUP_DELAY_SECS)) => {}
        }

        loop {
            if let Err(e) = self.cycle(Utc::now().timestamp()).await {
                log::error!("[Scheduler] Cycle failed: {}", e);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("[Scheduler] Stopped");
                    return;
                }
                _ = sleep(Duration::from_secs(SCHEDULER_CHECK_INTERVAL_SECS)) => {}
            }
        }
    }

    /// One scan: deliver everything due, reschedule recurring reminders,
    /// expire the undeliverable. The whole scan runs inside a single
    /// transaction with one commit at the end; an error rolls back every
    /// state change from this cycle.
    pub async fn cycle(&self, now: i64) -> GatewayResult<()> {
        let mut tx = self.store.begin().await?;
        let due = ReminderStore::due_with(&mut tx, now).await?;

        for reminder in due {
            log::info!(
                "[Scheduler] Reminder #{} due: '{}' for device {}",
                reminder.id,
                reminder.message,
                reminder.device_id
            );

            if self.deliver(&reminder).await {
                ReminderStore::mark_delivered_with(&mut tx, reminder.id).await?;
                log::info!("[Scheduler] Reminder #{} delivered", reminder.id);

                if reminder.is_recurring {
                    self.schedule_recurrence(&mut tx, &reminder).await?;
                }
            } else {
                let overdue = now - reminder.remind_at;
                if overdue > REMINDER_EXPIRY_SECS {
                    ReminderStore::mark_failed_with(&mut tx, reminder.id).await?;
                    log::warn!(
                        "[Scheduler] Reminder #{} expired after {}s, marking failed",
                        reminder.id,
                        overdue
                    );
                }
                // Otherwise stays pending for the next cycle.
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Speaks one reminder into the device's live session. Returns
    /// whether delivery completed.
    async fn deliver(&self, reminder: &Reminder) -> bool {
        let Some(entry) = self.connections.lookup_connection(&reminder.device_id) else {
            log::info!(
                "[Scheduler] Device {} not connected, deferring",
                reminder.device_id
            );
            return false;
        };

        if session_busy(&entry.session) {
            log::info!(
                "[{}] Device {} busy, deferring reminder",
                entry.session.session_id,
                reminder.device_id
            );
            return false;
        }

        let sid = entry.session.session_id.clone();
        let user = entry.session.config.read().clone();

        let frames = match self.tts.synthesize(&reminder.message, Some(&user)).await {
            Ok(frames) if !frames.is_empty() => frames,
            Ok(_) => return false,
            Err(e) => {
                log::error!("[{}] Reminder synthesis failed: {}", sid, e);
                return false;
            }
        };

        let started = entry
            .sink
            .send_json(
                &Outbound::TtsStart {
                    text: reminder.message.clone(),
                },
                &sid,
                "reminder_tts_start",
            )
            .await;
        if !started {
            return false;
        }

        let total = frames.len();
        let mut controller = AudioRateController::new(self.frame_duration_ms);
        controller.enqueue_all(frames);

        let sink = Arc::clone(&entry.sink);
        let drain_sid = sid.clone();
        let abort_sink = Arc::clone(&entry.sink);
        let sent = controller
            .drain(
                move |frame| {
                    let sink = Arc::clone(&sink);
                    let sid = drain_sid.clone();
                    async move { sink.send_audio(frame, &sid).await }
                },
                move || abort_sink.is_closed(),
            )
            .await;

        let ended = entry
            .sink
            .send_json(&Outbound::tts_end(), &sid, "reminder_tts_end")
            .await;

        log::info!(
            "[{}] Reminder pushed to {}: {}/{} frames",
            sid,
            reminder.device_id,
            sent,
            total
        );
        sent == total && ended
    }

    /// Inserts the next occurrence of a recurring reminder on the
    /// cycle's transaction.
    async fn schedule_recurrence(
        &self,
        conn: &mut SqliteConnection,
        parent: &Reminder,
    ) -> GatewayResult<()> {
        let Some(rule) = parent.recurrence_rule.as_deref() else {
            return Ok(());
        };
        let Some(base) = DateTime::<Utc>::from_timestamp(parent.remind_at, 0) else {
            return Ok(());
        };

        match next_occurrence(base.naive_utc(), rule) {
            Some(next) => {
                let next_at = next.and_utc().timestamp();
                let id = ReminderStore::schedule_next_with(conn, parent, next_at).await?;
                log::info!(
                    "[Scheduler] Recurring reminder #{} rescheduled as #{} at {}",
                    parent.id,
                    id,
                    next
                );
            }
            None => {
                log::warn!(
                    "[Scheduler] Reminder #{} has unsupported rule '{}', not rescheduling",
                    parent.id,
                    rule
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::providers::ProviderResult;
    use crate::sender::test_support::RecordingSink;
    use crate::sender::OutboundSink;
    use crate::session::UserConfig;
    use crate::store::setup::setup_test_database;
    use crate::store::NewReminder;

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
            Ok((0..self.frames).map(|_| Bytes::from_static(&[0; 8])).collect())
        }
    }

    struct Fixture {
        scheduler: ReminderScheduler,
        store: Arc<ReminderStore>,
        connections: Arc<ConnectionRegistry>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(ReminderStore::new(setup_test_database().await));
        let connections = Arc::new(ConnectionRegistry::new());
        let scheduler = ReminderScheduler::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            Arc::new(StubTts { frames: 4 }),
            60,
            CancellationToken::new(),
        );
        Fixture {
            scheduler,
            store,
            connections,
        }
    }

    fn pending(device: &str, remind_at: i64, rule: Option<&str>) -> NewReminder {
        NewReminder {
            user_id: 1,
            device_id: device.to_string(),
            remind_at,
            message: "该吃药了".to_string(),
            is_recurring: rule.is_some(),
            recurrence_rule: rule.map(str::to_string),
        }
    }

    fn connect(connections: &ConnectionRegistry, device: &str) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::new());
        let session = Arc::new(Session::new(device));
        connections.insert(sink.clone() as Arc<dyn OutboundSink>, session);
        sink
    }

    #[tokio::test]
    async fn delivers_due_reminder_to_idle_device() {
        let f = fixture().await;
        let id = f.store.insert(&pending("dev-1", 990, None)).await.unwrap();
        let sink = connect(&f.connections, "dev-1");

        f.scheduler.cycle(1_000).await.unwrap();

        let texts = sink.texts();
        assert!(texts[0].contains("tts_start"));
        assert!(texts[0].contains("该吃药了"));
        assert!(texts[1].contains("tts_end"));
        assert_eq!(sink.binary_count(), 4);
        assert_eq!(f.store.get(id).await.unwrap().unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn busy_device_defers_delivery() {
        let f = fixture().await;
        let id = f.store.insert(&pending("dev-1", 990, None)).await.unwrap();

        let sink = Arc::new(RecordingSink::new());
        let session = Arc::new(Session::new("dev-1"));
        session.set_processing(true);
        f.connections
            .insert(sink.clone() as Arc<dyn OutboundSink>, session);

        f.scheduler.cycle(1_000).await.unwrap();

        assert!(sink.texts().is_empty());
        assert_eq!(f.store.get(id).await.unwrap().unwrap().delivered, 0);
    }

    #[tokio::test]
    async fn disconnected_device_stays_pending_until_expiry() {
        let f = fixture().await;
        let fresh = f.store.insert(&pending("dev-1", 990, None)).await.unwrap();
        let stale = f
            .store
            .insert(&pending("dev-2", 1_000 - REMINDER_EXPIRY_SECS - 10, None))
            .await
            .unwrap();

        f.scheduler.cycle(1_000).await.unwrap();

        assert_eq!(f.store.get(fresh).await.unwrap().unwrap().delivered, 0);
        assert_eq!(f.store.get(stale).await.unwrap().unwrap().delivered, 2);
    }

    #[tokio::test]
    async fn recurring_reminder_spawns_next_occurrence() {
        let f = fixture().await;
        let remind_at = 1_700_000_000;
        let id = f
            .store
            .insert(&pending("dev-1", remind_at, Some("daily")))
            .await
            .unwrap();
        connect(&f.connections, "dev-1");

        f.scheduler.cycle(remind_at + 10).await.unwrap();

        assert_eq!(f.store.get(id).await.unwrap().unwrap().delivered, 1);
        let next = f
            .store
            .due(remind_at + 10 + 86_400)
            .await
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].remind_at, remind_at + 86_400);
        assert_eq!(next[0].message, "该吃药了");
        assert!(next[0].is_recurring);
    }

    #[tokio::test]
    async fn unsupported_rule_is_not_rescheduled() {
        let f = fixture().await;
        let id = f
            .store
            .insert(&pending("dev-1", 990, Some("every-blue-moon")))
            .await
            .unwrap();
        connect(&f.connections, "dev-1");

        f.scheduler.cycle(1_000).await.unwrap();

        assert_eq!(f.store.get(id).await.unwrap().unwrap().delivered, 1);
        assert!(f.store.due(i64::MAX).await.unwrap().is_empty());
    }
}
