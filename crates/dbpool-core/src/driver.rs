//! Database driver trait definition

use crate::{Connection, DatabaseParams, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Options applied to every session a driver opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverOptions {
    /// Upper bound for the network and auth handshake
    pub connect_timeout: Duration,
    /// Ask the driver to keep the transport alive between uses
    pub persistent: bool,
    /// TCP keepalive interval used when `persistent` is set
    pub keepalive: Duration,
    /// Use server-side prepared statements instead of client-side emulation
    pub server_side_prepares: bool,
}

impl DriverOptions {
    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the persistent-connection flag
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}

impl Default for DriverOptions {
    /// Defaults: 5 second connect timeout, not persistent (60 second
    /// keepalive once enabled), server-side prepares
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            persistent: false,
            keepalive: Duration::from_secs(60),
            server_side_prepares: true,
        }
    }
}

/// Core driver trait that all database drivers must implement
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Unique identifier for this driver (e.g., "mysql")
    fn name(&self) -> &'static str;

    /// Display name for logs and tooling
    fn display_name(&self) -> &'static str {
        self.name()
    }

    /// Default connection port
    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Open a new session.
    ///
    /// Implementations must not retry; retry policy belongs to the pool.
    async fn connect(
        &self,
        params: &DatabaseParams,
        options: &DriverOptions,
    ) -> Result<Arc<dyn Connection>>;

    /// Build a connection string from parameters, password included
    fn build_connection_string(&self, params: &DatabaseParams) -> String;

    /// Connection string with the password masked, safe to log
    fn redacted_connection_string(&self, params: &DatabaseParams) -> String {
        let full = self.build_connection_string(params);
        match params.password.as_deref() {
            Some(password) if !password.is_empty() => full.replace(password, "****"),
            _ => full,
        }
    }
}
