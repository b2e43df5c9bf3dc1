//! Report rendering

use comfy_table::{Table, presets::UTF8_FULL};
use dbpool_connection::{
    CircuitState, ExtendedPoolStats, MetricsSnapshot, PoolKey, PoolManager, PoolStrategy,
};
use serde::Serialize;

/// What a command prints
#[derive(Debug, Serialize)]
pub struct Report {
    pub pool: String,
    pub strategy: PoolStrategy,
    pub breaker: CircuitState,
    #[serde(flatten)]
    pub stats: ExtendedPoolStats,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
    pub held: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_error: Option<String>,
}

impl Report {
    /// Snapshot the manager's view of `key`
    pub fn collect(manager: &PoolManager, key: &PoolKey, strategy: PoolStrategy) -> Self {
        Self {
            pool: key.short().to_string(),
            strategy,
            breaker: manager.breaker().state(),
            stats: manager.extended_stats(key),
            metrics: manager.metrics(),
            ping_ms: None,
            held: 0,
            acquire_error: None,
        }
    }

    pub fn to_table(&self) -> Table {
        let stats = &self.stats.stats;
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec!["Metric", "Value"]);

        let mut rows = vec![
            ("pool", self.pool.clone()),
            ("strategy", self.strategy.to_string()),
            ("breaker", format!("{:?}", self.breaker)),
            ("available", stats.available().to_string()),
            ("in use", stats.in_use().to_string()),
            ("total", stats.total().to_string()),
            ("max size", self.stats.max_pool_size.to_string()),
            ("max age", format!("{}s", self.stats.max_age_secs)),
            ("utilization", format!("{:.0}%", stats.utilization() * 100.0)),
            ("last cleanup", stats.last_cleanup_time().to_rfc3339()),
            ("connections created", self.metrics.connections_created.to_string()),
            ("acquire attempts", self.metrics.connection_attempts.to_string()),
            ("failed acquires", self.metrics.failed_connections.to_string()),
            (
                "avg acquire",
                format!("{:.2}ms", self.metrics.average_acquire_time_ms),
            ),
        ];
        if let Some(ping) = self.ping_ms {
            rows.push(("ping", format!("{:.2}ms", ping)));
        }
        if self.held > 0 {
            rows.push(("held", self.held.to_string()));
        }
        if let Some(error) = &self.acquire_error {
            rows.push(("acquire error", error.clone()));
        }

        for (name, value) in rows {
            table.add_row(vec![name.to_string(), value]);
        }
        table
    }
}
