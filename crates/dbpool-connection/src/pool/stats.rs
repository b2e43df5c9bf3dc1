//! Pool statistics types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about one pool key's current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Idle connections ready to be handed out
    available: usize,
    /// Connections currently checked out
    in_use: usize,
    /// available + in_use
    total: usize,
    /// When the last eviction sweep ran (or the manager started)
    last_cleanup_time: DateTime<Utc>,
}

impl PoolStats {
    pub fn new(available: usize, in_use: usize, last_cleanup_time: DateTime<Utc>) -> Self {
        Self {
            available,
            in_use,
            total: available + in_use,
            last_cleanup_time,
        }
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn last_cleanup_time(&self) -> DateTime<Utc> {
        self.last_cleanup_time
    }

    /// Calculate pool utilization as a fraction (0.0 to 1.0)
    ///
    /// Returns 0.0 if total is 0 to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }

    /// Check if every connection is checked out
    pub fn is_full(&self) -> bool {
        self.available == 0 && self.total > 0
    }
}

/// [`PoolStats`] plus the limits the pool runs under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedPoolStats {
    #[serde(flatten)]
    pub stats: PoolStats,
    pub max_age_secs: u64,
    pub max_pool_size: usize,
    pub cleanup_interval_secs: u64,
}
