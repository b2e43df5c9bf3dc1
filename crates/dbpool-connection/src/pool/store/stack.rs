//! LIFO store for processes that never wait on the pool

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dbpool_core::PoolKey;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{PoolEntry, PoolStore};
use crate::connection::ManagedConnection;

#[derive(Default)]
struct Slots {
    available: Vec<PoolEntry>,
    in_use: HashMap<Uuid, PoolEntry>,
}

impl Slots {
    fn is_empty(&self) -> bool {
        self.available.is_empty() && self.in_use.is_empty()
    }
}

/// Mutex-guarded stack per pool key.
///
/// The most recently returned connection is reused first, which keeps the
/// fewest sessions warm. `take_available` never waits.
pub struct StackStore {
    capacity: usize,
    slots: Mutex<HashMap<PoolKey, Slots>>,
}

impl StackStore {
    /// `capacity` caps the available set of each key
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PoolStore for StackStore {
    async fn take_available(&self, key: &PoolKey, _wait: Duration) -> Option<ManagedConnection> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key)?;
        let entry = slot.available.pop()?;
        let connection = entry.into_connection();
        slot.in_use
            .insert(connection.id(), PoolEntry::new(connection.clone()));
        Some(connection)
    }

    fn mark_in_use(&self, key: &PoolKey, connection: ManagedConnection) {
        self.slots
            .lock()
            .entry(key.clone())
            .or_default()
            .in_use
            .insert(connection.id(), PoolEntry::new(connection));
    }

    fn remove_in_use(&self, key: &PoolKey, id: Uuid) -> bool {
        self.slots
            .lock()
            .get_mut(key)
            .is_some_and(|slot| slot.in_use.remove(&id).is_some())
    }

    fn is_in_use(&self, key: &PoolKey, id: Uuid) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.in_use.contains_key(&id))
    }

    fn mark_available(
        &self,
        key: &PoolKey,
        connection: ManagedConnection,
    ) -> Result<(), ManagedConnection> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        if slot.available.len() >= self.capacity {
            return Err(connection);
        }
        slot.in_use.remove(&connection.id());
        slot.available.push(PoolEntry::new(connection));
        Ok(())
    }

    async fn evict_expired(&self, max_age: Duration) -> Vec<ManagedConnection> {
        let mut evicted = Vec::new();
        let mut slots = self.slots.lock();
        for slot in slots.values_mut() {
            let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut slot.available)
                .into_iter()
                .partition(|entry| entry.expired(max_age, true));
            slot.available = kept;
            evicted.extend(expired.into_iter().map(PoolEntry::into_connection));

            let stale: Vec<Uuid> = slot
                .in_use
                .iter()
                .filter(|(_, entry)| entry.expired(max_age, false))
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                if let Some(entry) = slot.in_use.remove(&id) {
                    evicted.push(entry.into_connection());
                }
            }
        }
        slots.retain(|_, slot| !slot.is_empty());
        evicted
    }

    fn size_available(&self, key: &PoolKey) -> usize {
        self.slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.available.len())
    }

    fn size_in_use(&self, key: &PoolKey) -> usize {
        self.slots.lock().get(key).map_or(0, |slot| slot.in_use.len())
    }

    fn size_total(&self, key: &PoolKey) -> usize {
        self.slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.available.len() + slot.in_use.len())
    }

    fn keys(&self) -> Vec<PoolKey> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    async fn drain(&self) -> Vec<ManagedConnection> {
        let slots = std::mem::take(&mut *self.slots.lock());
        slots
            .into_values()
            .flat_map(|slot| {
                slot.available
                    .into_iter()
                    .chain(slot.in_use.into_values())
                    .map(PoolEntry::into_connection)
            })
            .collect()
    }
}
