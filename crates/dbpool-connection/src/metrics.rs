//! Pool-wide counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by a pool manager and the connections it hands out.
///
/// All counters are atomics so the manager can be shared across worker
/// threads without a lock around the hot path.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    connections_created: AtomicU64,
    connection_attempts: AtomicU64,
    failed_connections: AtomicU64,
    acquisitions: AtomicU64,
    total_acquire_micros: AtomicU64,
    queries: AtomicU64,
    failed_queries: AtomicU64,
    total_query_micros: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one `acquire` call
    pub fn record_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one newly opened connection
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed `acquire`
    pub fn record_failure(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Add a successful acquisition to the rolling average
    pub fn record_acquire(&self, elapsed: Duration) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_acquire_micros
            .fetch_add(duration_micros(elapsed), Ordering::Relaxed);
    }

    /// Record a statement run through a pooled connection
    pub fn record_query(&self, elapsed: Duration, succeeded: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.total_query_micros
            .fetch_add(duration_micros(elapsed), Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        let total_acquire = self.total_acquire_micros.load(Ordering::Relaxed);
        let queries = self.queries.load(Ordering::Relaxed);
        let total_query = self.total_query_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            acquisitions,
            total_acquire_time_ms: micros_to_ms(total_acquire),
            average_acquire_time_ms: average_ms(total_acquire, acquisitions),
            queries,
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            average_query_time_ms: average_ms(total_query, queries),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.connections_created,
            &self.connection_attempts,
            &self.failed_connections,
            &self.acquisitions,
            &self.total_acquire_micros,
            &self.queries,
            &self.failed_queries,
            &self.total_query_micros,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1_000.0
}

fn average_ms(total_micros: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        micros_to_ms(total_micros) / count as f64
    }
}

/// Serializable view of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connections_created: u64,
    pub connection_attempts: u64,
    pub failed_connections: u64,
    pub acquisitions: u64,
    pub total_acquire_time_ms: f64,
    pub average_acquire_time_ms: f64,
    pub queries: u64,
    pub failed_queries: u64,
    pub average_query_time_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_averages() {
        let metrics = PoolMetrics::new();
        metrics.record_acquire(Duration::from_millis(2));
        metrics.record_acquire(Duration::from_millis(4));
        metrics.record_query(Duration::from_millis(10), true);
        metrics.record_query(Duration::from_millis(20), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.acquisitions, 2);
        assert_eq!(snapshot.total_acquire_time_ms, 6.0);
        assert_eq!(snapshot.average_acquire_time_ms, 3.0);
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.failed_queries, 1);
        assert_eq!(snapshot.average_query_time_ms, 15.0);
    }

    #[test]
    fn test_empty_snapshot_has_zero_averages() {
        assert_eq!(PoolMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_reset() {
        let metrics = PoolMetrics::new();
        metrics.record_attempt();
        metrics.record_created();
        metrics.record_failure();
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
