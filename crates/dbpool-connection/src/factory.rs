//! Connection factory

use std::sync::Arc;

use async_trait::async_trait;
use dbpool_core::{DatabaseParams, DbPoolError, DriverOptions, Result};
use dbpool_drivers::DriverRegistry;

use crate::connection::ManagedConnection;

/// Factory trait for creating new pooled connections
///
/// Implementations make exactly one attempt per call; retry policy
/// belongs to the caller.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection for `params`
    async fn create(&self, params: &DatabaseParams) -> Result<ManagedConnection>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self, params: &DatabaseParams) -> Result<ManagedConnection> {
        (**self).create(params).await
    }
}

/// Factory that resolves drivers by name from a [`DriverRegistry`]
#[derive(Debug)]
pub struct DriverConnectionFactory {
    registry: DriverRegistry,
    options: DriverOptions,
}

impl DriverConnectionFactory {
    pub fn new(registry: DriverRegistry, options: DriverOptions) -> Self {
        Self { registry, options }
    }

    /// Built-in drivers with default session options
    pub fn with_defaults() -> Self {
        Self::new(DriverRegistry::with_defaults(), DriverOptions::default())
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }
}

#[async_trait]
impl ConnectionFactory for DriverConnectionFactory {
    #[tracing::instrument(skip(self, params), fields(driver = %params.driver, endpoint = %params.endpoint()))]
    async fn create(&self, params: &DatabaseParams) -> Result<ManagedConnection> {
        let driver = self.registry.get(&params.driver).ok_or_else(|| {
            DbPoolError::Driver(format!(
                "Unknown database driver '{}' (available: {})",
                params.driver,
                self.registry.list().join(", ")
            ))
        })?;

        let connection = ManagedConnection::new(params.clone(), driver, self.options.clone());
        connection.connect().await?;

        tracing::debug!(connection_id = %connection.id(), "connection created");
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_factory, mock_params};

    #[tokio::test]
    async fn test_create_returns_connected() {
        let (driver, factory) = mock_factory();
        let conn = factory.create(&mock_params()).await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.driver_name(), "mock");
        assert_eq!(driver.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_create_does_not_retry() {
        let (driver, factory) = mock_factory();
        driver.set_failing(true);
        let err = factory.create(&mock_params()).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(driver.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_driver() {
        let (_, factory) = mock_factory();
        let params = DatabaseParams::new("oracle");
        let err = factory.create(&params).await.unwrap_err();
        assert!(matches!(err, DbPoolError::Driver(_)));
        assert!(err.to_string().contains("available: mock"));
        assert!(!err.is_connection_error());
    }
}
