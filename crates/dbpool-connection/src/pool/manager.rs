//! Pool manager: acquire, release and shutdown over a pool store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dbpool_core::{DatabaseParams, DbPoolError, PoolKey, Result};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use super::config::PoolConfig;
use super::stats::{ExtendedPoolStats, PoolStats};
use super::store::PoolStore;
use crate::breaker::CircuitBreaker;
use crate::connection::ManagedConnection;
use crate::factory::ConnectionFactory;
use crate::metrics::{MetricsSnapshot, PoolMetrics};

struct CleanupMark {
    at: Instant,
    wall: DateTime<Utc>,
}

impl CleanupMark {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// A slot claimed for a connection that is still being opened.
///
/// Counted next to the store's total so concurrent callers cannot create
/// past `max_size` while a handshake is in flight.
struct Reservation<'a> {
    pending: &'a Mutex<HashMap<PoolKey, usize>>,
    key: PoolKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(&self.key);
            }
        }
    }
}

/// Owns every pool for one process (or one request, see
/// [`EnvironmentAdapter`](crate::EnvironmentAdapter)).
///
/// Per connection the lifecycle is `Available -> CheckedOut -> Available`
/// or `-> Discarded`; a discarded connection is disconnected and gone from
/// all bookkeeping. Nothing here retries: every failed `acquire` is
/// reported to the caller.
pub struct PoolManager {
    config: PoolConfig,
    store: Arc<dyn PoolStore>,
    factory: Arc<dyn ConnectionFactory>,
    breaker: CircuitBreaker,
    metrics: Arc<PoolMetrics>,
    pools: RwLock<HashMap<PoolKey, DatabaseParams>>,
    pending: Mutex<HashMap<PoolKey, usize>>,
    last_cleanup: Mutex<CleanupMark>,
}

impl PoolManager {
    /// Create a manager; fails with `Configuration` if `config` is invalid
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn PoolStore>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let breaker = CircuitBreaker::new(
            u64::from(config.failure_threshold()),
            config.breaker_cooldown(),
        );

        tracing::debug!(
            min_size = config.min_size(),
            max_size = config.max_size(),
            max_age = ?config.max_connection_age(),
            "pool manager created"
        );

        Ok(Self {
            config,
            store,
            factory,
            breaker,
            metrics: Arc::new(PoolMetrics::new()),
            pools: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(CleanupMark::now()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Remember the parameters behind a pool key and return the key
    pub fn register(&self, params: DatabaseParams) -> PoolKey {
        let key = params.pool_key();
        let mut pools = self.pools.write();
        if !pools.contains_key(&key) {
            tracing::info!(pool = %key, driver = %params.driver, endpoint = %params.endpoint(), "pool registered");
            pools.insert(key.clone(), params);
        }
        key
    }

    /// Registered pool keys
    pub fn keys(&self) -> Vec<PoolKey> {
        self.pools.read().keys().cloned().collect()
    }

    fn params_for(&self, key: &PoolKey) -> Result<DatabaseParams> {
        self.pools.read().get(key).cloned().ok_or_else(|| {
            DbPoolError::Configuration(format!(
                "No connection parameters registered for pool {}",
                key
            ))
        })
    }

    /// Check out a connection for `key`.
    ///
    /// Reuses a healthy idle connection when there is one, otherwise opens
    /// a new one while the pool is below `max_size`. A full pool fails with
    /// `PoolExhausted` (after the configured short wait, if any) and an open
    /// breaker fails with `CircuitOpen` before any I/O.
    #[tracing::instrument(skip(self), fields(pool = %key))]
    pub async fn acquire(&self, key: &PoolKey) -> Result<ManagedConnection> {
        self.metrics.record_attempt();
        let started = Instant::now();

        // Dropping `admission` mid-attempt (a cancelled acquire) frees a
        // half-open probe slot.
        let result = match self.breaker.allow_request() {
            Some(admission) => {
                let result = self.try_acquire(key).await;
                match &result {
                    Ok(_) => admission.succeeded(),
                    Err(e) if e.is_connection_error() => admission.failed(),
                    Err(_) => admission.inconclusive(),
                }
                result
            }
            None => Err(DbPoolError::CircuitOpen {
                failures: self.breaker.failure_count(),
            }),
        };

        match result {
            Ok(connection) => {
                self.metrics.record_acquire(started.elapsed());
                tracing::debug!(connection_id = %connection.id(), "connection acquired");
                Ok(connection)
            }
            Err(e) => {
                self.metrics.record_failure();
                tracing::warn!(error = %e, "failed to acquire connection");
                Err(e)
            }
        }
    }

    async fn try_acquire(&self, key: &PoolKey) -> Result<ManagedConnection> {
        let params = self.params_for(key)?;

        if let Some(connection) = self.take_healthy(key, Duration::ZERO).await {
            return Ok(connection);
        }

        if self.cleanup_due() {
            self.cleanup().await;
            if let Some(connection) = self.take_healthy(key, Duration::ZERO).await {
                return Ok(connection);
            }
        }

        if let Some(reservation) = self.reserve(key) {
            let connection = self.factory.create(&params).await?;
            self.adopt(&connection);
            self.store.mark_in_use(key, connection.clone());
            drop(reservation);
            return Ok(connection);
        }

        let wait = self.config.acquire_wait();
        if !wait.is_zero() {
            if let Some(connection) = self.take_healthy(key, wait).await {
                return Ok(connection);
            }
        }

        Err(DbPoolError::PoolExhausted {
            in_use: self.store.size_in_use(key),
        })
    }

    /// Pop idle candidates until one passes the age and health checks.
    /// Failed candidates are discarded.
    async fn take_healthy(&self, key: &PoolKey, wait: Duration) -> Option<ManagedConnection> {
        let mut wait = wait;
        loop {
            let candidate = self.store.take_available(key, wait).await?;
            wait = Duration::ZERO;

            match self.check(&candidate).await {
                Ok(()) => return Some(candidate),
                Err(e) => {
                    tracing::debug!(connection_id = %candidate.id(), reason = %e, "discarding pooled connection");
                    self.discard(key, candidate).await;
                }
            }
        }
    }

    async fn check(&self, connection: &ManagedConnection) -> Result<()> {
        let max_age = self.config.max_connection_age();
        if connection.age() > max_age {
            return Err(DbPoolError::HealthCheck(format!(
                "connection older than {:?}",
                max_age
            )));
        }
        connection
            .ping(self.config.connect_timeout())
            .await
            .map(|_| ())
            .map_err(|e| DbPoolError::HealthCheck(e.to_string()))
    }

    fn reserve(&self, key: &PoolKey) -> Option<Reservation<'_>> {
        let mut pending = self.pending.lock();
        let in_flight = pending.get(key).copied().unwrap_or(0);
        if self.store.size_total(key) + in_flight >= self.config.max_size() {
            return None;
        }
        *pending.entry(key.clone()).or_insert(0) += 1;
        Some(Reservation {
            pending: &self.pending,
            key: key.clone(),
        })
    }

    fn adopt(&self, connection: &ManagedConnection) {
        connection.attach_metrics(self.metrics.clone());
        self.metrics.record_created();
    }

    async fn discard(&self, key: &PoolKey, connection: ManagedConnection) {
        self.store.remove_in_use(key, connection.id());
        connection.disconnect().await;
    }

    /// Return a checked-out connection.
    ///
    /// Disconnected or unhealthy connections, and connections that would
    /// push the idle set past `max_size`, are discarded instead of pooled.
    #[tracing::instrument(skip(self, connection), fields(pool = %connection.pool_key(), connection_id = %connection.id()))]
    pub async fn release(&self, connection: ManagedConnection) {
        let key = connection.pool_key().clone();

        if !self.store.is_in_use(&key, connection.id()) {
            tracing::warn!("released connection is not checked out from this pool");
            return;
        }

        if !connection.is_connected() {
            tracing::debug!("discarding disconnected connection");
            self.discard(&key, connection).await;
            return;
        }

        if self.store.size_available(&key) >= self.config.max_size() {
            tracing::debug!("idle set full, discarding connection");
            self.discard(&key, connection).await;
            return;
        }

        if let Err(e) = connection.ping(self.config.connect_timeout()).await {
            tracing::debug!(error = %e, "health check failed on release");
            self.discard(&key, connection).await;
            return;
        }

        if let Err(rejected) = self.store.mark_available(&key, connection) {
            self.discard(&key, rejected).await;
        }
    }

    /// Open idle connections until the pool holds `min_size`.
    ///
    /// Returns how many were opened. Stops at the first failure.
    #[tracing::instrument(skip(self), fields(pool = %key))]
    pub async fn warm_up(&self, key: &PoolKey) -> Result<usize> {
        let params = self.params_for(key)?;
        let mut opened = 0;

        while self.store.size_total(key) < self.config.min_size() {
            let Some(reservation) = self.reserve(key) else {
                break;
            };
            let connection = match self.factory.create(&params).await {
                Ok(connection) => connection,
                Err(e) => {
                    if e.is_connection_error() {
                        self.breaker.record_failure();
                    }
                    return Err(e);
                }
            };
            self.adopt(&connection);
            self.store.mark_in_use(key, connection.clone());
            drop(reservation);

            if let Err(rejected) = self.store.mark_available(key, connection) {
                self.discard(key, rejected).await;
                break;
            }
            opened += 1;
        }

        tracing::info!(opened, "pool warmed up");
        Ok(opened)
    }

    fn cleanup_due(&self) -> bool {
        self.last_cleanup.lock().at.elapsed() >= self.config.cleanup_interval()
    }

    /// Evict and disconnect every connection older than `max_connection_age`,
    /// in both sets and for every key. Returns the number evicted.
    pub async fn cleanup(&self) -> usize {
        let evicted = self
            .store
            .evict_expired(self.config.max_connection_age())
            .await;
        let count = evicted.len();
        for connection in evicted {
            connection.disconnect().await;
        }
        *self.last_cleanup.lock() = CleanupMark::now();

        if count > 0 {
            tracing::info!(evicted = count, "expired connections evicted");
        }
        for key in self.store.keys() {
            tracing::debug!(
                pool = %key,
                available = self.store.size_available(&key),
                in_use = self.store.size_in_use(&key),
                "pool after cleanup"
            );
        }
        count
    }

    /// Disconnect every connection of every key and clear all bookkeeping.
    ///
    /// Registered parameters survive, so the manager can be used again.
    /// Returns the number of connections closed.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let connections = self.store.drain().await;
        let count = connections.len();
        for connection in connections {
            connection.disconnect().await;
        }

        self.pending.lock().clear();
        self.metrics.reset();
        self.breaker.reset();
        *self.last_cleanup.lock() = CleanupMark::now();

        tracing::info!(closed = count, "pool manager shut down");
        count
    }

    pub fn pool_stats(&self, key: &PoolKey) -> PoolStats {
        PoolStats::new(
            self.store.size_available(key),
            self.store.size_in_use(key),
            self.last_cleanup.lock().wall,
        )
    }

    pub fn extended_stats(&self, key: &PoolKey) -> ExtendedPoolStats {
        ExtendedPoolStats {
            stats: self.pool_stats(key),
            max_age_secs: self.config.max_connection_age().as_secs(),
            max_pool_size: self.config.max_size(),
            cleanup_interval_secs: self.config.cleanup_interval().as_secs(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
