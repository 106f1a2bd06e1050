//! Keyed store of connection records.
//!
//! Each record sits behind its own mutex so that read-modify-write on one
//! connection is atomic without serializing the whole registry. Closures
//! passed to [`ConnectionRegistry::update`] run under that mutex and must
//! not call back into the registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionSeed, Health, LogLevel};

/// Lifecycle notifications published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Added { uuid: String },
    HealthChanged { uuid: String, from: Health, to: Health },
    Removed { uuid: String },
}

type Slot = Arc<Mutex<Connection>>;

#[derive(Default)]
struct Slots {
    order: Vec<String>,
    by_uuid: HashMap<String, Slot>,
}

/// Shared handle to the connection table. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionRegistry {
    slots: Arc<RwLock<Slots>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            slots: Arc::new(RwLock::new(Slots::default())),
            events,
        }
    }

    /// Register a connection. Returns the existing uuid untouched if it is
    /// already present; synthesizes a v4 uuid when none is given.
    pub fn add(&self, uuid: Option<String>, seed: ConnectionSeed) -> String {
        self.insert(uuid, seed).0
    }

    /// Like [`add`](Self::add), also reporting whether a new record was created.
    pub fn insert(&self, uuid: Option<String>, seed: ConnectionSeed) -> (String, bool) {
        let uuid = {
            let mut slots = self.slots.write();
            let uuid = match uuid {
                Some(uuid) if slots.by_uuid.contains_key(&uuid) => return (uuid, false),
                Some(uuid) => uuid,
                None => loop {
                    let candidate = Uuid::new_v4().to_string();
                    if !slots.by_uuid.contains_key(&candidate) {
                        break candidate;
                    }
                },
            };
            let record = Connection::from_seed(uuid.clone(), seed);
            slots.order.push(uuid.clone());
            slots.by_uuid.insert(uuid.clone(), Arc::new(Mutex::new(record)));
            uuid
        };
        debug!(uuid = %uuid, "connection registered");
        let _ = self.events.send(ConnectionEvent::Added { uuid: uuid.clone() });
        (uuid, true)
    }

    fn slot(&self, uuid: &str) -> Option<Slot> {
        self.slots.read().by_uuid.get(uuid).cloned()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.slots.read().by_uuid.contains_key(uuid)
    }

    /// Snapshot of one record.
    pub fn get(&self, uuid: &str) -> Option<Connection> {
        let slot = self.slot(uuid)?;
        let record = slot.lock();
        (!record.removed).then(|| record.clone())
    }

    /// Atomically read-modify-write one record.
    ///
    /// Returns `None` without calling `f` when the uuid is unknown or the
    /// record was removed concurrently.
    pub fn update<R>(&self, uuid: &str, f: impl FnOnce(&mut Connection) -> R) -> Option<R> {
        let slot = self.slot(uuid)?;
        let mut record = slot.lock();
        if record.removed {
            return None;
        }
        Some(f(&mut record))
    }

    /// Atomically decide a health transition. `f` returns the new health or
    /// `None` to leave it. Changes are published as [`ConnectionEvent::HealthChanged`].
    ///
    /// Returns the health after the call.
    pub fn update_health(
        &self,
        uuid: &str,
        f: impl FnOnce(&Connection) -> Option<Health>,
    ) -> Option<Health> {
        let (from, to) = self.update(uuid, |conn| {
            let from = conn.health;
            if let Some(to) = f(conn) {
                conn.health = to;
            }
            (from, conn.health)
        })?;
        if from != to {
            debug!(uuid = %uuid, %from, %to, "health changed");
            let _ = self.events.send(ConnectionEvent::HealthChanged {
                uuid: uuid.to_string(),
                from,
                to,
            });
        }
        Some(to)
    }

    /// Unconditionally set health.
    pub fn set_health(&self, uuid: &str, health: Health) -> Option<Health> {
        self.update_health(uuid, |_| Some(health))
    }

    /// Append to the connection's log ring and mirror the entry to tracing.
    ///
    /// Returns false if the connection is unknown.
    pub fn log(&self, uuid: &str, level: LogLevel, message: impl Into<String>) -> bool {
        let message = message.into();
        match level {
            LogLevel::Error => error!(uuid = %uuid, "{message}"),
            LogLevel::Warning => warn!(uuid = %uuid, "{message}"),
            LogLevel::Info => info!(uuid = %uuid, "{message}"),
            LogLevel::Outbound | LogLevel::OutboundRaw => trace!(uuid = %uuid, level = level.code(), "{message}"),
        }
        self.update(uuid, |conn| conn.logs.push(level, message))
            .is_some()
    }

    /// Remove a record. Its watchdog timers and lifecycle token are
    /// cancelled before it becomes unreachable.
    pub fn remove(&self, uuid: &str) -> Option<Connection> {
        let slot = {
            let mut slots = self.slots.write();
            let slot = slots.by_uuid.remove(uuid)?;
            slots.order.retain(|u| u != uuid);
            slot
        };
        let snapshot = {
            let mut record = slot.lock();
            record.removed = true;
            record.watchdog.cancel_all();
            record.lifecycle.cancel();
            record.clone()
        };
        debug!(uuid = %uuid, "connection removed");
        let _ = self.events.send(ConnectionEvent::Removed {
            uuid: uuid.to_string(),
        });
        Some(snapshot)
    }

    /// Snapshot of every record, in insertion order.
    pub fn list(&self) -> Vec<Connection> {
        let slots: Vec<Slot> = {
            let slots = self.slots.read();
            slots
                .order
                .iter()
                .filter_map(|uuid| slots.by_uuid.get(uuid).cloned())
                .collect()
        };
        slots
            .iter()
            .filter_map(|slot| {
                let record = slot.lock();
                (!record.removed).then(|| record.clone())
            })
            .collect()
    }

    /// Registered uuids, in insertion order.
    pub fn uuids(&self) -> Vec<String> {
        self.slots.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}
