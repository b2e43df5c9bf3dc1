//! Driver session trait

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A live database session opened by a driver.
///
/// The pool wraps every session in its own bookkeeping type; drivers only
/// have to provide statement execution, close and a closed check.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "mysql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE)
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Query used by the pool's liveness probe.
    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    /// Close the session. Calling it more than once is a no-op.
    async fn close(&self) -> Result<()>;

    /// Check if the session is closed
    fn is_closed(&self) -> bool;
}
