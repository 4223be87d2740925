//! SQLite-backed persistence.
//!
//! Only reminders survive restarts; everything else the gateway tracks is
//! connection-scoped and lives in memory.

pub mod reminders;
pub mod setup;

pub use reminders::{NewReminder, Reminder, ReminderStore};
pub use setup::setup_database;
