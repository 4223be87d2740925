//! Device credential and live-connection registries.
//!
//! Both are process-wide dashmaps owned by the bootstrap. The connection
//! registry is the reminder scheduler's only way to reach a device; it
//! never hands out the socket read half, only the safe sender and the
//! session's coarse flags.

use std::sync::Arc;

use dashmap::DashMap;

use crate::sender::OutboundSink;
use crate::session::Session;

/// Registered device credentials: device id → expected token.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a device registration.
    pub fn register(&self, device_id: impl Into<String>, token: impl Into<String>) {
        self.devices.insert(device_id.into(), token.into());
    }

    /// Removes a registration; returns whether it existed.
    pub fn remove(&self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }

    /// Whether the (device id, token) pair matches a registration.
    ///
    /// Registrations may hold either the plain token (seeded from flags)
    /// or an argon2 hash of it (synced from the account store).
    pub fn is_valid(&self, device_id: &str, token: &str) -> bool {
        self.devices.get(device_id).is_some_and(|expected| {
            let expected = expected.value().as_str();
            if expected.starts_with("$argon2") {
                crate::auth::verify_token(token, expected)
            } else {
                expected == token
            }
        })
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// One live device connection: its safe sender and session state.
#[derive(Clone)]
pub struct ConnectionEntry {
    pub sink: Arc<dyn OutboundSink>,
    pub session: Arc<Session>,
}

/// Live connections keyed by device id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection, replacing any previous entry for the same
    /// device (a reconnect supersedes the stale socket).
    pub fn insert(&self, sink: Arc<dyn OutboundSink>, session: Arc<Session>) {
        let device_id = session.device_id.clone();
        let previous = self
            .connections
            .insert(device_id.clone(), ConnectionEntry { sink, session });
        if let Some(previous) = previous {
            log::info!(
                "[{}] Device {} reconnected, superseding previous session",
                previous.session.session_id,
                device_id
            );
        }
    }

    /// Removes a device's entry, but only if it still belongs to the
    /// given session. A reconnect may already have replaced it.
    pub fn remove(&self, device_id: &str, session_id: &str) {
        self.connections
            .remove_if(device_id, |_, entry| entry.session.session_id == session_id);
    }

    /// Looks up the live connection for a device.
    pub fn lookup_connection(&self, device_id: &str) -> Option<ConnectionEntry> {
        self.connections.get(device_id).map(|e| e.clone())
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
