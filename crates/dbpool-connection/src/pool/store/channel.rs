//! Channel-backed store for long-running workers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbpool_core::PoolKey;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::{PoolEntry, PoolStore};
use crate::connection::ManagedConnection;

/// One pool key's available queue and in-use map.
///
/// `available` counts entries that are in the channel or have just been
/// received and not yet moved to `in_use`; it is only changed while
/// `books` is held, and sends happen under the same lock, so the channel
/// never holds more than `available` entries.
struct Lane {
    tx: mpsc::Sender<PoolEntry>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PoolEntry>>,
    books: Mutex<Books>,
}

#[derive(Default)]
struct Books {
    available: usize,
    in_use: HashMap<Uuid, PoolEntry>,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            books: Mutex::new(Books::default()),
        }
    }

    async fn receive(&self, wait: Duration) -> Option<PoolEntry> {
        if wait.is_zero() {
            // Another task is already waiting on this lane; don't queue behind it.
            let mut rx = self.rx.try_lock().ok()?;
            return rx.try_recv().ok();
        }
        tokio::time::timeout(wait, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Everything currently queued, without waiting for releases
    async fn drain_queued(&self) -> Vec<PoolEntry> {
        let mut rx = self.rx.lock().await;
        let mut queued = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            queued.push(entry);
        }
        queued
    }
}

/// Bounded channel per pool key.
///
/// `take_available` can suspend the calling task for a short bounded wait
/// while another task releases a connection. Returned connections are
/// reused in FIFO order, since that is the order the channel yields.
pub struct ChannelStore {
    capacity: usize,
    lanes: RwLock<HashMap<PoolKey, Arc<Lane>>>,
}

impl ChannelStore {
    /// `capacity` bounds each key's channel
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lanes: RwLock::new(HashMap::new()),
        }
    }

    fn lane(&self, key: &PoolKey) -> Option<Arc<Lane>> {
        self.lanes.read().get(key).cloned()
    }

    fn lane_or_create(&self, key: &PoolKey) -> Arc<Lane> {
        if let Some(lane) = self.lane(key) {
            return lane;
        }
        self.lanes
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Lane::new(self.capacity)))
            .clone()
    }

    /// Drop lanes that hold nothing and that no task is using
    fn prune_empty_lanes(&self) {
        self.lanes.write().retain(|_, lane| {
            if Arc::strong_count(lane) > 1 {
                return true;
            }
            let books = lane.books.lock();
            books.available + books.in_use.len() > 0
        });
    }

    #[cfg(test)]
    pub(crate) fn lane_count(&self) -> usize {
        self.lanes.read().len()
    }

    fn all_lanes(&self) -> Vec<(PoolKey, Arc<Lane>)> {
        self.lanes
            .read()
            .iter()
            .map(|(key, lane)| (key.clone(), lane.clone()))
            .collect()
    }
}

#[async_trait]
impl PoolStore for ChannelStore {
    async fn take_available(&self, key: &PoolKey, wait: Duration) -> Option<ManagedConnection> {
        let lane = self.lane(key)?;
        let connection = lane.receive(wait).await?.into_connection();

        let mut books = lane.books.lock();
        books.available = books.available.saturating_sub(1);
        books
            .in_use
            .insert(connection.id(), PoolEntry::new(connection.clone()));
        Some(connection)
    }

    fn mark_in_use(&self, key: &PoolKey, connection: ManagedConnection) {
        let lane = self.lane_or_create(key);
        lane.books
            .lock()
            .in_use
            .insert(connection.id(), PoolEntry::new(connection));
    }

    fn remove_in_use(&self, key: &PoolKey, id: Uuid) -> bool {
        self.lane(key)
            .is_some_and(|lane| lane.books.lock().in_use.remove(&id).is_some())
    }

    fn is_in_use(&self, key: &PoolKey, id: Uuid) -> bool {
        self.lane(key)
            .is_some_and(|lane| lane.books.lock().in_use.contains_key(&id))
    }

    fn mark_available(
        &self,
        key: &PoolKey,
        connection: ManagedConnection,
    ) -> Result<(), ManagedConnection> {
        let lane = self.lane_or_create(key);
        let mut books = lane.books.lock();
        if books.available >= self.capacity {
            return Err(connection);
        }

        let id = connection.id();
        match lane.tx.try_send(PoolEntry::new(connection)) {
            Ok(()) => {
                books.available += 1;
                books.in_use.remove(&id);
                Ok(())
            }
            Err(TrySendError::Full(entry)) | Err(TrySendError::Closed(entry)) => {
                Err(entry.into_connection())
            }
        }
    }

    async fn evict_expired(&self, max_age: Duration) -> Vec<ManagedConnection> {
        let mut evicted = Vec::new();
        for (_, lane) in self.all_lanes() {
            let queued = lane.drain_queued().await;

            let mut books = lane.books.lock();
            for entry in queued {
                if entry.expired(max_age, true) {
                    books.available = books.available.saturating_sub(1);
                    evicted.push(entry.into_connection());
                    continue;
                }
                // Room is guaranteed: the entry was counted and just left the channel
                if let Err(TrySendError::Full(entry)) | Err(TrySendError::Closed(entry)) =
                    lane.tx.try_send(entry)
                {
                    books.available = books.available.saturating_sub(1);
                    evicted.push(entry.into_connection());
                }
            }

            let stale: Vec<Uuid> = books
                .in_use
                .iter()
                .filter(|(_, entry)| entry.expired(max_age, false))
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                if let Some(entry) = books.in_use.remove(&id) {
                    evicted.push(entry.into_connection());
                }
            }
        }
        self.prune_empty_lanes();
        evicted
    }

    fn size_available(&self, key: &PoolKey) -> usize {
        self.lane(key).map_or(0, |lane| lane.books.lock().available)
    }

    fn size_in_use(&self, key: &PoolKey) -> usize {
        self.lane(key).map_or(0, |lane| lane.books.lock().in_use.len())
    }

    fn size_total(&self, key: &PoolKey) -> usize {
        self.lane(key).map_or(0, |lane| {
            let books = lane.books.lock();
            books.available + books.in_use.len()
        })
    }

    fn keys(&self) -> Vec<PoolKey> {
        self.all_lanes()
            .into_iter()
            .filter(|(_, lane)| {
                let books = lane.books.lock();
                books.available + books.in_use.len() > 0
            })
            .map(|(key, _)| key)
            .collect()
    }

    async fn drain(&self) -> Vec<ManagedConnection> {
        let mut drained = Vec::new();
        for (_, lane) in self.all_lanes() {
            let queued = lane.drain_queued().await;
            let mut books = lane.books.lock();
            books.available = 0;
            drained.extend(queued.into_iter().map(PoolEntry::into_connection));
            drained.extend(books.in_use.drain().map(|(_, entry)| entry.into_connection()));
        }
        self.prune_empty_lanes();
        drained
    }
}
