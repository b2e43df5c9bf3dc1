//! Runtime detection and pool composition

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dbpool_core::{DbPoolError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::factory::ConnectionFactory;
use crate::pool::{ChannelStore, PoolConfig, PoolManager, PoolStore, StackStore};
use crate::settings::DatabaseSettings;

/// How pooled connections should live in this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStrategy {
    /// Short-lived process or request: LIFO stack, acquisition never waits
    PerRequest,
    /// Long-running worker: channel store with a short bounded wait
    LongRunning,
}

impl PoolStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStrategy::PerRequest => "per_request",
            PoolStrategy::LongRunning => "long_running",
        }
    }

    /// Infer the strategy from the tokio runtime the caller runs on
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                PoolStrategy::LongRunning
            }
            _ => PoolStrategy::PerRequest,
        }
    }
}

impl fmt::Display for PoolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolStrategy {
    type Err = DbPoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_request" | "per-request" => Ok(PoolStrategy::PerRequest),
            "long_running" | "long-running" => Ok(PoolStrategy::LongRunning),
            other => Err(DbPoolError::Configuration(format!(
                "Unknown pool strategy '{}' (expected per_request or long_running)",
                other
            ))),
        }
    }
}

/// Picks a [`PoolStrategy`] once and builds managers to match it.
///
/// An explicit strategy always wins over detection.
#[derive(Debug, Default)]
pub struct EnvironmentAdapter {
    forced: Option<PoolStrategy>,
    cached: Mutex<Option<PoolStrategy>>,
}

impl EnvironmentAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: PoolStrategy) -> Self {
        Self {
            forced: Some(strategy),
            cached: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            forced: settings.strategy,
            cached: Mutex::new(None),
        }
    }

    /// The strategy for this process, decided on first call
    pub fn strategy(&self) -> PoolStrategy {
        let mut cached = self.cached.lock();
        if let Some(strategy) = *cached {
            return strategy;
        }
        let strategy = self.forced.unwrap_or_else(PoolStrategy::detect);
        tracing::info!(
            strategy = %strategy,
            forced = self.forced.is_some(),
            "pool strategy selected"
        );
        *cached = Some(strategy);
        strategy
    }

    /// Forget the cached decision so the next call detects again
    pub fn refresh(&self) {
        *self.cached.lock() = None;
    }

    pub fn build_store(&self, config: &PoolConfig) -> Arc<dyn PoolStore> {
        match self.strategy() {
            PoolStrategy::PerRequest => Arc::new(StackStore::new(config.max_size())),
            PoolStrategy::LongRunning => Arc::new(ChannelStore::new(config.max_size())),
        }
    }

    /// Build a manager with the store matching [`strategy`](Self::strategy).
    ///
    /// `PerRequest` managers never wait for a release, whatever
    /// `config.acquire_wait()` says.
    pub fn build_manager(
        &self,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Arc<PoolManager>> {
        let config = match self.strategy() {
            PoolStrategy::PerRequest => config.with_acquire_wait(Duration::ZERO),
            PoolStrategy::LongRunning => config,
        };
        let store = self.build_store(&config);
        Ok(Arc::new(PoolManager::new(config, store, factory)?))
    }

    /// A manager that lives for one unit of work
    pub fn request_scope(
        &self,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<RequestScope> {
        Ok(RequestScope {
            manager: self.build_manager(config, factory)?,
        })
    }
}

/// Pools scoped to a single request; [`finish`](Self::finish) closes them.
pub struct RequestScope {
    manager: Arc<PoolManager>,
}

impl RequestScope {
    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    /// Shut the scope's manager down; returns the number of connections closed
    pub async fn finish(self) -> usize {
        self.manager.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_factory, mock_params};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_strategy() {
        assert_eq!(
            "per_request".parse::<PoolStrategy>().unwrap(),
            PoolStrategy::PerRequest
        );
        assert_eq!(
            "Long-Running".parse::<PoolStrategy>().unwrap(),
            PoolStrategy::LongRunning
        );
        assert!(matches!(
            "fibers".parse::<PoolStrategy>(),
            Err(DbPoolError::Configuration(_))
        ));
        assert_eq!(PoolStrategy::LongRunning.to_string(), "long_running");
    }

    #[test]
    fn test_no_runtime_is_per_request() {
        assert_eq!(PoolStrategy::detect(), PoolStrategy::PerRequest);
    }

    #[tokio::test]
    async fn test_current_thread_runtime_is_per_request() {
        assert_eq!(EnvironmentAdapter::new().strategy(), PoolStrategy::PerRequest);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime_is_long_running() {
        assert_eq!(EnvironmentAdapter::new().strategy(), PoolStrategy::LongRunning);
    }

    #[tokio::test]
    async fn test_forced_strategy_wins() {
        let adapter = EnvironmentAdapter::with_strategy(PoolStrategy::LongRunning);
        assert_eq!(adapter.strategy(), PoolStrategy::LongRunning);
    }

    #[test]
    fn test_strategy_is_cached_until_refresh() {
        let adapter = EnvironmentAdapter::new();
        assert_eq!(adapter.strategy(), PoolStrategy::PerRequest);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        runtime.block_on(async {
            assert_eq!(adapter.strategy(), PoolStrategy::PerRequest);
            adapter.refresh();
            assert_eq!(adapter.strategy(), PoolStrategy::LongRunning);
        });
    }

    #[tokio::test]
    async fn test_per_request_manager_never_waits() {
        let (_, factory) = mock_factory();
        let adapter = EnvironmentAdapter::with_strategy(PoolStrategy::PerRequest);
        let manager = adapter
            .build_manager(PoolConfig::new(1, 3), factory)
            .unwrap();
        assert_eq!(manager.config().acquire_wait(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_long_running_manager_keeps_wait() {
        let (_, factory) = mock_factory();
        let adapter = EnvironmentAdapter::with_strategy(PoolStrategy::LongRunning);
        let manager = adapter
            .build_manager(PoolConfig::new(1, 3), factory)
            .unwrap();
        assert_eq!(manager.config().acquire_wait(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let (_, factory) = mock_factory();
        let adapter = EnvironmentAdapter::new();
        let result = adapter.build_manager(PoolConfig::new(5, 1), factory);
        assert!(matches!(result, Err(DbPoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_request_scope_closes_everything() {
        let (_, factory) = mock_factory();
        let scope = EnvironmentAdapter::new()
            .request_scope(PoolConfig::new(1, 3), factory)
            .unwrap();
        let key = scope.manager().register(mock_params());

        let a = scope.manager().acquire(&key).await.unwrap();
        let b = scope.manager().acquire(&key).await.unwrap();
        scope.manager().release(a.clone()).await;

        assert_eq!(scope.finish().await, 2);
        assert!(!a.is_connected());
        assert!(!b.is_connected());
    }
}
