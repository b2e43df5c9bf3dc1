//! Mock driver and pool builders shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbpool_core::{
    Connection, DatabaseDriver, DatabaseParams, DbPoolError, DriverOptions, PoolKey, QueryResult,
    Result, StatementResult, Value,
};
use dbpool_drivers::DriverRegistry;
use parking_lot::Mutex;

use crate::factory::DriverConnectionFactory;
use crate::pool::{ChannelStore, PoolConfig, PoolManager, PoolStore, StackStore};

/// Route tracing output through the test harness
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Mock session; answers every query while `healthy` is set
pub struct MockConnection {
    closed: AtomicBool,
    healthy: Arc<AtomicBool>,
    latency: Duration,
}

impl MockConnection {
    pub fn new(healthy: Arc<AtomicBool>, latency: Duration) -> Self {
        Self {
            closed: AtomicBool::new(false),
            healthy,
            latency,
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DbPoolError::Connection("session closed".into()));
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection("server has gone away".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check()?;
        if sql.starts_with("BROKEN") {
            return Err(DbPoolError::Query("syntax error".into()));
        }
        Ok(StatementResult {
            affected_rows: 1,
            last_insert_id: Some(1),
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check()?;
        if sql.starts_with("BROKEN") {
            return Err(DbPoolError::Query("syntax error".into()));
        }
        Ok(QueryResult::empty())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mock driver that counts connect calls
pub struct MockDriver {
    connects: AtomicUsize,
    failing: AtomicBool,
    healthy: Arc<AtomicBool>,
    connect_delay: Mutex<Duration>,
    query_latency: Mutex<Duration>,
    sessions: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            healthy: Arc::new(AtomicBool::new(true)),
            connect_delay: Mutex::new(Duration::ZERO),
            query_latency: Mutex::new(Duration::ZERO),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Number of `connect` calls so far, failed ones included
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make every following connect fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Flip the liveness of every session, existing and future
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn set_query_latency(&self, latency: Duration) {
        *self.query_latency.lock() = latency;
    }

    /// Close the n-th session behind the pool's back
    pub async fn kill_session(&self, index: usize) {
        let session = self.sessions.lock().get(index).cloned();
        if let Some(session) = session {
            let _ = session.close().await;
        }
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(
        &self,
        _params: &DatabaseParams,
        _options: &DriverOptions,
    ) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbPoolError::Connection("connection refused".into()));
        }
        let latency = *self.query_latency.lock();
        let session = Arc::new(MockConnection::new(self.healthy.clone(), latency));
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    fn build_connection_string(&self, params: &DatabaseParams) -> String {
        format!("mock://{}", params.endpoint())
    }
}

pub fn mock_params() -> DatabaseParams {
    DatabaseParams::new("mock")
        .with_host("db.test")
        .with_port(3306)
        .with_database("app")
        .with_username("app")
}

pub fn mock_factory() -> (Arc<MockDriver>, Arc<DriverConnectionFactory>) {
    let driver = Arc::new(MockDriver::new());
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    let factory = DriverConnectionFactory::new(registry, DriverOptions::default());
    (driver, Arc::new(factory))
}

/// Which store a test pool runs on
#[derive(Debug, Clone, Copy)]
pub enum StoreKind {
    Stack,
    Channel,
}

impl StoreKind {
    pub fn build(self, config: &PoolConfig) -> Arc<dyn PoolStore> {
        match self {
            StoreKind::Stack => Arc::new(StackStore::new(config.max_size())),
            StoreKind::Channel => Arc::new(ChannelStore::new(config.max_size())),
        }
    }
}

/// Manager over the mock driver with one registered pool
pub fn mock_manager(
    config: PoolConfig,
    kind: StoreKind,
) -> (Arc<MockDriver>, Arc<PoolManager>, PoolKey) {
    init_test_logging();
    let (driver, factory) = mock_factory();
    let store = kind.build(&config);
    let manager = PoolManager::new(config, store, factory).expect("valid config");
    let key = manager.register(mock_params());
    (driver, Arc::new(manager), key)
}
