//! Connection pooling for database connections
//!
//! A [`PoolManager`] keeps one logical pool per [`PoolKey`](dbpool_core::PoolKey)
//! on top of a [`PoolStore`]. Two stores are provided:
//!
//! - [`StackStore`]: a mutex-guarded LIFO stack, for short-lived processes
//!   where acquisition never waits
//! - [`ChannelStore`]: a bounded channel per pool, for long-running
//!   workers where `acquire` may wait briefly for a release
//!
//! # Example
//!
//! ```ignore
//! use dbpool_connection::pool::{PoolConfig, PoolManager, StackStore};
//!
//! let config = PoolConfig::new(1, 20)
//!     .with_max_connection_age(Duration::from_secs(600));
//!
//! let store = Arc::new(StackStore::new(config.max_size()));
//! let manager = PoolManager::new(config, store, Arc::new(factory))?;
//! let key = manager.register(params);
//!
//! let conn = manager.acquire(&key).await?;
//! // Use connection...
//! manager.release(conn).await;
//! ```

mod config;
mod manager;
mod stats;
mod store;


pub use config::PoolConfig;
pub use manager::PoolManager;
pub use stats::{ExtendedPoolStats, PoolStats};
pub use store::{ChannelStore, PoolEntry, PoolStore, StackStore};
