//! Error types for dbpool

use thiserror::Error;

/// Core error type for pool and driver operations
#[derive(Error, Debug)]
pub enum DbPoolError {
    /// Invalid pool or driver configuration, raised at construction time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Driver-level connect failure or a session that went away
    #[error("Connection error: {0}")]
    Connection(String),

    /// No idle connection and the pool is at capacity
    #[error("Connection pool exhausted: {in_use} connections in use")]
    PoolExhausted { in_use: usize },

    /// A pooled connection failed its liveness probe
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// Too many failed connection attempts; new attempts are rejected without I/O
    #[error("Circuit breaker open after {failures} failed connection attempts")]
    CircuitOpen { failures: u64 },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbPoolError {
    /// Whether the error means the underlying session can no longer be used.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DbPoolError::Connection(_) | DbPoolError::Io(_) | DbPoolError::Timeout(_)
        )
    }

    /// Whether the error was produced by the pool itself rather than a driver.
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            DbPoolError::PoolExhausted { .. } | DbPoolError::CircuitOpen { .. }
        )
    }
}

/// Result type alias for dbpool operations
pub type Result<T> = std::result::Result<T, DbPoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DbPoolError::PoolExhausted { in_use: 4 };
        assert_eq!(
            err.to_string(),
            "Connection pool exhausted: 4 connections in use"
        );

        let err = DbPoolError::CircuitOpen { failures: 5 };
        assert!(err.to_string().contains("5 failed connection attempts"));
    }

    #[test]
    fn test_error_classification() {
        assert!(DbPoolError::Connection("gone".into()).is_connection_error());
        assert!(DbPoolError::Timeout("slow".into()).is_connection_error());
        assert!(!DbPoolError::Query("syntax".into()).is_connection_error());

        assert!(DbPoolError::PoolExhausted { in_use: 1 }.is_pool_error());
        assert!(DbPoolError::CircuitOpen { failures: 1 }.is_pool_error());
        assert!(!DbPoolError::Configuration("bad".into()).is_pool_error());
    }
}
