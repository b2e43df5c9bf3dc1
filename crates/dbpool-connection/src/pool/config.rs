//! Pool configuration types

use std::time::Duration;

use dbpool_core::{DbPoolError, Result};
use serde::{Deserialize, Serialize};

/// Shortest allowed connection lifetime
pub const MIN_CONNECTION_AGE: Duration = Duration::from_secs(60);

/// Configuration for a connection pool
///
/// Controls pool sizing, connection lifetime and the circuit breaker.
/// Nothing is checked at construction; [`PoolManager::new`](super::PoolManager::new)
/// calls [`validate`](Self::validate) and refuses an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of idle connections `warm_up` opens
    min_size: usize,
    /// Maximum number of connections (idle + in use) per pool key
    max_size: usize,
    /// Connections older than this are never handed out, in seconds
    max_connection_age_secs: u64,
    /// Minimum time between opportunistic eviction sweeps, in seconds
    cleanup_interval_secs: u64,
    /// Bound for connect handshakes and liveness probes, in milliseconds
    connect_timeout_ms: u64,
    /// How long `acquire` waits for a release once the pool is full, in milliseconds
    acquire_wait_ms: u64,
    /// Consecutive failed connection attempts that open the breaker
    failure_threshold: u32,
    /// Time before an open breaker lets a probe through; `None` keeps it open
    breaker_cooldown_secs: Option<u64>,
}

impl PoolConfig {
    /// Create a new pool configuration with the given min and max sizes
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            max_connection_age_secs: 300,
            cleanup_interval_secs: 60,
            connect_timeout_ms: 5_000,
            acquire_wait_ms: 100,
            failure_threshold: 5,
            breaker_cooldown_secs: Some(30),
        }
    }

    /// Check the invariants the pool relies on
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(DbPoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(DbPoolError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_connection_age() < MIN_CONNECTION_AGE {
            return Err(DbPoolError::Configuration(format!(
                "max_connection_age must be at least {}s, got {}s",
                MIN_CONNECTION_AGE.as_secs(),
                self.max_connection_age_secs
            )));
        }
        if self.failure_threshold == 0 {
            return Err(DbPoolError::Configuration(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(DbPoolError::Configuration(
                "connect_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the maximum connection age (whole seconds)
    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age_secs = age.as_secs();
        self
    }

    /// Set the eviction sweep interval (whole seconds)
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_acquire_wait(mut self, wait: Duration) -> Self {
        self.acquire_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the breaker cool-down; `None` makes a trip permanent until reset
    pub fn with_breaker_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.breaker_cooldown_secs = cooldown.map(|d| d.as_secs());
        self
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_connection_age(&self) -> Duration {
        Duration::from_secs(self.max_connection_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_wait_ms)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn breaker_cooldown(&self) -> Option<Duration> {
        self.breaker_cooldown_secs.map(Duration::from_secs)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_size: 1
    /// - max_size: 10
    /// - max_connection_age: 300 seconds
    /// - cleanup_interval: 60 seconds
    /// - connect_timeout: 5 seconds
    /// - acquire_wait: 100 milliseconds
    /// - failure_threshold: 5
    /// - breaker_cooldown: 30 seconds
    fn default() -> Self {
        Self::new(1, 10)
    }
}
