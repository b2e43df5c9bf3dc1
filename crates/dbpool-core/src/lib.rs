//! dbpool core - shared abstractions for the connection pool
//!
//! This crate provides the traits and types that the pool and the
//! database drivers agree on:
//!
//! - `DatabaseDriver` - Trait for database driver implementations
//! - `Connection` - Trait for a live driver session
//! - `DatabaseParams` / `PoolKey` - Connection parameters and the pool identity derived from them
//! - `DriverOptions` - Options applied to every new driver session
//! - `DbPoolError` - The error taxonomy used across the workspace
//! - Common types like `Value`, `Row`, `QueryResult`

mod connection;
mod driver;
mod error;
mod params;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use params::*;
pub use types::*;
