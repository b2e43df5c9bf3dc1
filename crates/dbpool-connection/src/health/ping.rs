//! Database ping implementation

use dbpool_core::Connection;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    /// The connection is closed
    ConnectionClosed,
    /// Query execution failed
    QueryFailed(String),
    /// Ping timed out
    Timeout(Duration),
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::ConnectionClosed => write!(f, "Connection is closed"),
            PingError::QueryFailed(msg) => write!(f, "Ping query failed: {}", msg),
            PingError::Timeout(after) => write!(f, "Ping timed out after {:?}", after),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a database connection to check if it's alive.
///
/// Executes the driver's ping query (`SELECT 1` unless the driver says
/// otherwise) and returns the round-trip time.
pub async fn ping_database(conn: &dyn Connection) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match conn.query(conn.ping_query(), &[]).await {
        Ok(_) => Ok(start.elapsed()),
        Err(e) => Err(PingError::QueryFailed(e.to_string())),
    }
}

/// [`ping_database`] bounded by `timeout`
pub async fn ping_with_timeout(conn: &dyn Connection, timeout: Duration) -> PingResult {
    tokio::time::timeout(timeout, ping_database(conn))
        .await
        .map_err(|_| PingError::Timeout(timeout))?
}
