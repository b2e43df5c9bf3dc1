//! dbpool connection - connection pooling and lifecycle management
//!
//! This crate owns everything between "give me a connection for these
//! parameters" and the driver session underneath:
//!
//! - [`ManagedConnection`] wraps a driver session with identity, timestamps
//!   and last-error bookkeeping
//! - [`ConnectionFactory`] opens new connections, never retrying
//! - [`PoolStore`] holds the available and in-use sets, with a stack-based
//!   and a channel-based variant
//! - [`PoolManager`] runs acquire/release/shutdown on top of a store, a
//!   factory, a [`CircuitBreaker`] and [`PoolMetrics`]
//! - [`EnvironmentAdapter`] picks the store variant for the running process
//!
//! # Example
//!
//! ```ignore
//! use dbpool_connection::{DatabaseSettings, EnvironmentAdapter};
//! use std::sync::Arc;
//!
//! let settings = DatabaseSettings::from_env()?;
//! let adapter = EnvironmentAdapter::from_settings(&settings);
//! let manager = adapter.build_manager(settings.pool.clone(), Arc::new(settings.connection_factory()))?;
//!
//! let key = manager.register(settings.params.clone());
//! let conn = manager.acquire(&key).await?;
//! let rows = conn.query("SELECT id FROM users", &[]).await?;
//! manager.release(conn).await;
//! ```

pub mod breaker;
mod connection;
mod environment;
mod factory;
pub mod health;
pub mod logging;
mod metrics;
pub mod pool;
mod settings;

#[cfg(test)]
mod test_support;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use connection::ManagedConnection;
pub use environment::{EnvironmentAdapter, PoolStrategy, RequestScope};
pub use factory::{ConnectionFactory, DriverConnectionFactory};
pub use health::{PingError, PingResult, ping_database, ping_with_timeout};
pub use metrics::{MetricsSnapshot, PoolMetrics};
pub use pool::{
    ChannelStore, ExtendedPoolStats, PoolConfig, PoolEntry, PoolManager, PoolStats, PoolStore,
    StackStore,
};
pub use settings::{AppEnv, DatabaseSettings};

pub use dbpool_core::{DatabaseParams, DbPoolError, DriverOptions, PoolKey, Result};
