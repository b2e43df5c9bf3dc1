//! dbpool drivers - database driver implementations
//!
//! This crate bundles the concrete drivers behind cargo features and
//! provides the [`DriverRegistry`] the connection factory resolves
//! drivers from.

#[cfg(feature = "mysql")]
pub use dbpool_driver_mysql as mysql;

mod registry;

pub use registry::DriverRegistry;

/// Re-export commonly used types from dbpool-core
pub use dbpool_core::{
    Connection, DatabaseDriver, DatabaseParams, DbPoolError, DriverOptions, QueryResult, Result,
    Row, StatementResult, Value,
};
