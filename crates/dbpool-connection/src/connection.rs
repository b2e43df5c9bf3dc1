//! Pool-managed connection handle

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dbpool_core::{
    Connection, DatabaseDriver, DatabaseParams, DbPoolError, DriverOptions, PoolKey, QueryResult,
    Result, StatementResult, Value,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::health::{PingError, PingResult, ping_with_timeout};
use crate::metrics::PoolMetrics;

/// A driver session plus the bookkeeping the pool needs.
///
/// Cloning is cheap and every clone refers to the same session, so the
/// pool's in-use set and the borrower always agree on its state. A
/// connection should only be driven by one borrower at a time.
#[derive(Clone)]
pub struct ManagedConnection {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    pool_key: PoolKey,
    params: DatabaseParams,
    driver: Arc<dyn DatabaseDriver>,
    options: DriverOptions,
    created_at: Instant,
    state: Mutex<State>,
    metrics: OnceLock<Arc<PoolMetrics>>,
}

struct State {
    handle: Option<Arc<dyn Connection>>,
    connected: bool,
    last_used_at: Instant,
    last_error: Option<String>,
}

impl ManagedConnection {
    /// Create an unconnected handle; call [`connect`](Self::connect) to open it.
    pub fn new(
        params: DatabaseParams,
        driver: Arc<dyn DatabaseDriver>,
        options: DriverOptions,
    ) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                pool_key: params.pool_key(),
                params,
                driver,
                options,
                created_at: now,
                state: Mutex::new(State {
                    handle: None,
                    connected: false,
                    last_used_at: now,
                    last_error: None,
                }),
                metrics: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn pool_key(&self) -> &PoolKey {
        &self.inner.pool_key
    }

    pub fn params(&self) -> &DatabaseParams {
        &self.inner.params
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver.name()
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Time since the last statement, or since creation if none ran
    pub fn idle_time(&self) -> Duration {
        self.inner.state.lock().last_used_at.elapsed()
    }

    /// The most recent driver error, if any
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.live_handle().is_some()
    }

    /// Feed query timings into a pool's metrics. Only the first call has effect.
    pub(crate) fn attach_metrics(&self, metrics: Arc<PoolMetrics>) {
        let _ = self.inner.metrics.set(metrics);
    }

    fn live_handle(&self) -> Option<Arc<dyn Connection>> {
        let state = self.inner.state.lock();
        match &state.handle {
            Some(handle) if state.connected && !handle.is_closed() => Some(handle.clone()),
            _ => None,
        }
    }

    /// Open the session, or return the existing one if it is still live.
    ///
    /// The driver handshake is bounded by the configured connect timeout.
    /// On failure the error is kept as [`last_error`](Self::last_error)
    /// and returned as `DbPoolError::Connection`.
    #[tracing::instrument(skip(self), fields(connection_id = %self.inner.id, endpoint = %self.inner.params.endpoint()))]
    pub async fn connect(&self) -> Result<Arc<dyn Connection>> {
        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }

        let timeout = self.inner.options.connect_timeout;
        let attempt = tokio::time::timeout(
            timeout,
            self.inner
                .driver
                .connect(&self.inner.params, &self.inner.options),
        )
        .await;

        let error = match attempt {
            Ok(Ok(handle)) => {
                let mut state = self.inner.state.lock();
                state.handle = Some(handle.clone());
                state.connected = true;
                state.last_error = None;
                state.last_used_at = Instant::now();
                tracing::debug!("connection established");
                return Ok(handle);
            }
            Ok(Err(DbPoolError::Connection(msg))) => msg,
            Ok(Err(other)) => other.to_string(),
            Err(_) => format!(
                "Connection to {} timed out after {:?}",
                self.inner.params.endpoint(),
                timeout
            ),
        };

        tracing::warn!(error = %error, "failed to connect");
        let mut state = self.inner.state.lock();
        state.connected = false;
        state.last_error = Some(error.clone());
        Err(DbPoolError::Connection(error))
    }

    /// Close the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let handle = {
            let mut state = self.inner.state.lock();
            state.connected = false;
            state.handle.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                tracing::debug!(connection_id = %self.inner.id, error = %e, "error while closing connection");
            }
        }
    }

    /// Run the liveness probe, bounded by `timeout`
    pub async fn ping(&self, timeout: Duration) -> PingResult {
        let handle = self.live_handle().ok_or(PingError::ConnectionClosed)?;
        let result = ping_with_timeout(handle.as_ref(), timeout).await;
        if let Err(e) = &result {
            let mut state = self.inner.state.lock();
            state.last_error = Some(e.to_string());
        }
        result
    }

    /// Run a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let handle = self.require_handle()?;
        let start = Instant::now();
        let result = handle.query(sql, params).await;
        self.observe(&result, start.elapsed());
        result
    }

    /// Run a data-modifying statement
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let handle = self.require_handle()?;
        let start = Instant::now();
        let result = handle.execute(sql, params).await;
        self.observe(&result, start.elapsed());
        result
    }

    fn require_handle(&self) -> Result<Arc<dyn Connection>> {
        self.live_handle().ok_or_else(|| {
            DbPoolError::Connection(format!("Connection {} is not connected", self.inner.id))
        })
    }

    fn observe<T>(&self, result: &Result<T>, elapsed: Duration) {
        {
            let mut state = self.inner.state.lock();
            state.last_used_at = Instant::now();
            if let Err(e) = result {
                state.last_error = Some(e.to_string());
                if e.is_connection_error() {
                    state.connected = false;
                }
            }
        }
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_query(elapsed, result.is_ok());
        }
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.inner.id)
            .field("pool_key", &self.inner.pool_key)
            .field("driver", &self.inner.driver.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockDriver, mock_params};
    use pretty_assertions::assert_eq;

    fn managed(driver: &Arc<MockDriver>) -> ManagedConnection {
        ManagedConnection::new(mock_params(), driver.clone(), DriverOptions::default())
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        assert!(!conn.is_connected());

        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(driver.connect_count(), 1);
        assert_eq!(conn.pool_key(), &mock_params().pool_key());
    }

    #[tokio::test]
    async fn test_failed_connect_records_error() {
        let driver = Arc::new(MockDriver::new());
        driver.set_failing(true);
        let conn = managed(&driver);

        let Err(err) = conn.connect().await else {
            panic!("expected connect to fail");
        };
        assert!(matches!(err, DbPoolError::Connection(_)));
        assert!(!conn.is_connected());
        assert_eq!(conn.last_error().as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let driver = Arc::new(MockDriver::new());
        driver.set_connect_delay(Duration::from_secs(60));
        let conn = ManagedConnection::new(
            mock_params(),
            driver.clone(),
            DriverOptions::default().with_connect_timeout(Duration::from_secs(5)),
        );

        let Err(err) = conn.connect().await else {
            panic!("expected connect to fail");
        };
        assert!(err.to_string().contains("timed out after 5s"));
        assert!(conn.last_error().is_some());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        conn.connect().await.unwrap();

        conn.disconnect().await;
        conn.disconnect().await;
        assert!(!conn.is_connected());
        assert!(conn.query("SELECT 1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        let clone = conn.clone();
        conn.connect().await.unwrap();
        assert!(clone.is_connected());
        assert_eq!(clone.id(), conn.id());
    }

    #[tokio::test]
    async fn test_connection_error_marks_disconnected() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        conn.connect().await.unwrap();

        conn.query("BROKEN SQL", &[]).await.unwrap_err();
        assert!(conn.is_connected());
        assert_eq!(conn.last_error().as_deref(), Some("Query error: syntax error"));

        driver.set_healthy(false);
        conn.execute("UPDATE t SET a = 1", &[]).await.unwrap_err();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_queries_feed_metrics() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        let metrics = Arc::new(PoolMetrics::new());
        conn.attach_metrics(metrics.clone());
        conn.connect().await.unwrap();

        conn.query("SELECT 1", &[]).await.unwrap();
        conn.execute("BROKEN", &[]).await.unwrap_err();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert_eq!(snapshot.failed_queries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_and_idle_time() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        conn.connect().await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        conn.query("SELECT 1", &[]).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(conn.age(), Duration::from_secs(15));
        assert_eq!(conn.idle_time(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_ping_requires_connection() {
        let driver = Arc::new(MockDriver::new());
        let conn = managed(&driver);
        assert_eq!(
            conn.ping(Duration::from_secs(1)).await,
            Err(PingError::ConnectionClosed)
        );
        conn.connect().await.unwrap();
        assert!(conn.ping(Duration::from_secs(1)).await.is_ok());
    }
}
