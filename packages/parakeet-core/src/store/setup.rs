//! Database connection and schema setup.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::GatewayResult;

/// Opens the SQLite pool and creates the schema if missing.
pub async fn setup_database(url: &str) -> GatewayResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| crate::error::GatewayError::Storage(e.to_string()))?
        .create_if_missing(true);

    // An in-memory database exists per connection; it must not be
    // spread across a pool.
    let max_connections = if url.contains(":memory:") { 1 } else { 4 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reminders (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL,
            device_id       TEXT NOT NULL,
            remind_at       INTEGER NOT NULL,
            message         TEXT NOT NULL,
            delivered       INTEGER NOT NULL DEFAULT 0,
            is_recurring    INTEGER NOT NULL DEFAULT 0,
            recurrence_rule TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders (delivered, remind_at)",
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

/// Opens an in-memory database for tests.
#[cfg(test)]
pub async fn setup_test_database() -> SqlitePool {
    setup_database("sqlite::memory:")
        .await
        .expect("in-memory database")
}
