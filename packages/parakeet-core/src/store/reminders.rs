//! Reminder repository.
//!
//! Delivery is tri-state: 0 = pending, 1 = delivered, 2 = failed-expired.
//! The scheduler runs each scan inside a single transaction obtained from
//! [`ReminderStore::begin`] and commits once per cycle; a crash mid-cycle
//! rolls the whole scan back. The store runs in a single process, so no
//! row locking is used.
//!
//! Row operations come in pairs: a `*_with` form taking the connection
//! (for transactional callers) and a pool-backed convenience form for
//! single-statement use.

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::error::GatewayResult;

/// Pending delivery state.
pub const DELIVERY_PENDING: i64 = 0;
/// Successfully spoken to the device.
pub const DELIVERY_DONE: i64 = 1;
/// Undeliverable past the expiry window.
pub const DELIVERY_FAILED: i64 = 2;

/// A stored reminder row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Reminder {
    pub id: i64,
    pub user_id: i64,
    pub device_id: String,
    /// Due time, Unix seconds.
    pub remind_at: i64,
    pub message: String,
    pub delivered: i64,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
}

/// Fields for a reminder being created.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub user_id: i64,
    pub device_id: String,
    pub remind_at: i64,
    pub message: String,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
}

/// SQLite repository for reminders.
pub struct ReminderStore {
    pool: SqlitePool,
}

impl ReminderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a transaction spanning one scheduler cycle. Dropping it
    /// without [`Transaction::commit`] rolls every change back.
    pub async fn begin(&self) -> GatewayResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    // ── Row operations (transactional form) ──────────────────────────────

    /// Inserts a pending reminder and returns its id.
    pub async fn insert_with(
        conn: &mut SqliteConnection,
        reminder: &NewReminder,
    ) -> GatewayResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO reminders
                (user_id, device_id, remind_at, message, delivered, is_recurring, recurrence_rule)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(reminder.user_id)
        .bind(&reminder.device_id)
        .bind(reminder.remind_at)
        .bind(&reminder.message)
        .bind(reminder.is_recurring)
        .bind(&reminder.recurrence_rule)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// All pending reminders due at or before `now` (Unix seconds).
    pub async fn due_with(
        conn: &mut SqliteConnection,
        now: i64,
    ) -> GatewayResult<Vec<Reminder>> {
        let rows = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT id, user_id, device_id, remind_at, message,
                   delivered, is_recurring, recurrence_rule
            FROM reminders
            WHERE remind_at <= ? AND delivered = 0
            ORDER BY remind_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Marks a reminder successfully delivered.
    pub async fn mark_delivered_with(conn: &mut SqliteConnection, id: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE reminders SET delivered = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Marks a reminder failed-expired.
    pub async fn mark_failed_with(conn: &mut SqliteConnection, id: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE reminders SET delivered = 2 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Inserts the next occurrence of a recurring reminder, copying
    /// user, device, message, and rule from the parent.
    pub async fn schedule_next_with(
        conn: &mut SqliteConnection,
        parent: &Reminder,
        next_at: i64,
    ) -> GatewayResult<i64> {
        Self::insert_with(
            conn,
            &NewReminder {
                user_id: parent.user_id,
                device_id: parent.device_id.clone(),
                remind_at: next_at,
                message: parent.message.clone(),
                is_recurring: parent.is_recurring,
                recurrence_rule: parent.recurrence_rule.clone(),
            },
        )
        .await
    }

    // ── Row operations (pool-backed convenience) ─────────────────────────

    /// Inserts a pending reminder outside any transaction (used by the
    /// remind intent).
    pub async fn insert(&self, reminder: &NewReminder) -> GatewayResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_with(&mut conn, reminder).await
    }

    /// All pending reminders due at or before `now` (Unix seconds).
    pub async fn due(&self, now: i64) -> GatewayResult<Vec<Reminder>> {
        let mut conn = self.pool.acquire().await?;
        Self::due_with(&mut conn, now).await
    }

    /// Marks a reminder successfully delivered.
    pub async fn mark_delivered(&self, id: i64) -> GatewayResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::mark_delivered_with(&mut conn, id).await
    }

    /// Marks a reminder failed-expired.
    pub async fn mark_failed(&self, id: i64) -> GatewayResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::mark_failed_with(&mut conn, id).await
    }

    /// Fetches one reminder by id (test and admin use).
    pub async fn get(&self, id: i64) -> GatewayResult<Option<Reminder>> {
        let row = sqlx::query_as::<_, Reminder>(
            r#"
            SELECT id, user_id, device_id, remind_at, message,
                   delivered, is_recurring, recurrence_rule
            FROM reminders
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::setup::setup_test_database;

    fn reminder_at(remind_at: i64) -> NewReminder {
        NewReminder {
            user_id: 1,
            device_id: "dev-1".to_string(),
            remind_at,
            message: "吃药".to_string(),
            is_recurring: false,
            recurrence_rule: None,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_due() {
        let store = ReminderStore::new(setup_test_database().await);
        store.insert(&reminder_at(100)).await.unwrap();
        store.insert(&reminder_at(500)).await.unwrap();

        let due = store.due(200).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].remind_at, 100);
        assert_eq!(due[0].delivered, DELIVERY_PENDING);
    }

    #[tokio::test]
    async fn delivered_reminders_leave_due_set() {
        let store = ReminderStore::new(setup_test_database().await);
        let id = store.insert(&reminder_at(100)).await.unwrap();

        store.mark_delivered(id).await.unwrap();
        assert!(store.due(200).await.unwrap().is_empty());
        assert_eq!(store.get(id).await.unwrap().unwrap().delivered, DELIVERY_DONE);
    }

    #[tokio::test]
    async fn failed_reminders_leave_due_set() {
        let store = ReminderStore::new(setup_test_database().await);
        let id = store.insert(&reminder_at(100)).await.unwrap();

        store.mark_failed(id).await.unwrap();
        assert!(store.due(200).await.unwrap().is_empty());
        assert_eq!(
            store.get(id).await.unwrap().unwrap().delivered,
            DELIVERY_FAILED
        );
    }

    #[tokio::test]
    async fn schedule_next_copies_parent_fields() {
        let store = ReminderStore::new(setup_test_database().await);
        let id = store
            .insert(&NewReminder {
                user_id: 7,
                device_id: "dev-9".to_string(),
                remind_at: 1_000,
                message: "喝水".to_string(),
                is_recurring: true,
                recurrence_rule: Some("daily".to_string()),
            })
            .await
            .unwrap();
        let parent = store.get(id).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        let child_id = ReminderStore::schedule_next_with(&mut tx, &parent, 1_000 + 86_400)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let child = store.get(child_id).await.unwrap().unwrap();

        assert_eq!(child.remind_at, parent.remind_at + 86_400);
        assert_eq!(child.message, parent.message);
        assert_eq!(child.device_id, parent.device_id);
        assert_eq!(child.delivered, DELIVERY_PENDING);
        assert!(child.is_recurring);
        assert_eq!(child.recurrence_rule.as_deref(), Some("daily"));
    }

    #[tokio::test]
    async fn committed_transaction_applies_all_changes() {
        let store = ReminderStore::new(setup_test_database().await);
        let first = store.insert(&reminder_at(100)).await.unwrap();
        let second = store.insert(&reminder_at(110)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        ReminderStore::mark_delivered_with(&mut tx, first).await.unwrap();
        ReminderStore::mark_failed_with(&mut tx, second).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get(first).await.unwrap().unwrap().delivered, DELIVERY_DONE);
        assert_eq!(
            store.get(second).await.unwrap().unwrap().delivered,
            DELIVERY_FAILED
        );
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = ReminderStore::new(setup_test_database().await);
        let id = store.insert(&reminder_at(100)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            ReminderStore::mark_delivered_with(&mut tx, id).await.unwrap();
            // Dropped without commit.
        }

        assert_eq!(
            store.get(id).await.unwrap().unwrap().delivered,
            DELIVERY_PENDING
        );
    }
}
