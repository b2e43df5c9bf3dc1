//! Storage for idle and checked-out connections

use std::time::Duration;

use async_trait::async_trait;
use dbpool_core::PoolKey;
use tokio::time::Instant;
use uuid::Uuid;

use crate::connection::ManagedConnection;

mod channel;
mod stack;

pub use channel::ChannelStore;
pub use stack::StackStore;

/// A connection plus the moment it entered its current set.
///
/// For the available set that is when it was returned; for the in-use set
/// it is when it was checked out.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    connection: ManagedConnection,
    since: Instant,
}

impl PoolEntry {
    pub fn new(connection: ManagedConnection) -> Self {
        Self {
            connection,
            since: Instant::now(),
        }
    }

    pub fn connection(&self) -> &ManagedConnection {
        &self.connection
    }

    pub fn into_connection(self) -> ManagedConnection {
        self.connection
    }

    pub fn since(&self) -> Instant {
        self.since
    }

    /// Whether the entry has outlived `max_age` in its current set.
    ///
    /// Idle entries also expire on the connection's own age.
    fn expired(&self, max_age: Duration, idle: bool) -> bool {
        self.since.elapsed() > max_age || (idle && self.connection.age() > max_age)
    }
}

/// Available and in-use bookkeeping for every pool key.
///
/// A connection id is in at most one of the two sets at any time: every
/// method that moves a connection does so in a single critical section.
/// Stores never open or close connections and never check the pool's
/// maximum size; the manager does both.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Pop an idle connection and record it as in use.
    ///
    /// `wait` bounds how long to wait for a release when nothing is idle;
    /// stores that cannot wait ignore it.
    async fn take_available(&self, key: &PoolKey, wait: Duration) -> Option<ManagedConnection>;

    /// Record a freshly created connection as in use
    fn mark_in_use(&self, key: &PoolKey, connection: ManagedConnection);

    /// Forget an in-use connection; false if it was not checked out
    fn remove_in_use(&self, key: &PoolKey, id: Uuid) -> bool;

    fn is_in_use(&self, key: &PoolKey, id: Uuid) -> bool;

    /// Move a connection from in use to available.
    ///
    /// When the available set is at capacity the connection is handed back
    /// unchanged (still recorded as in use) so the caller can discard it.
    fn mark_available(
        &self,
        key: &PoolKey,
        connection: ManagedConnection,
    ) -> Result<(), ManagedConnection>;

    /// Remove every entry, in either set and for every key, older than
    /// `max_age`. The caller disconnects what comes back.
    async fn evict_expired(&self, max_age: Duration) -> Vec<ManagedConnection>;

    fn size_available(&self, key: &PoolKey) -> usize;

    fn size_in_use(&self, key: &PoolKey) -> usize;

    fn size_total(&self, key: &PoolKey) -> usize {
        self.size_available(key) + self.size_in_use(key)
    }

    /// Keys that currently hold at least one connection
    fn keys(&self) -> Vec<PoolKey>;

    /// Empty the store and hand back every connection it held
    async fn drain(&self) -> Vec<ManagedConnection>;
}
