//! Configuration from environment variables

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dbpool_core::{DatabaseParams, DbPoolError, DriverOptions, Result};
use dbpool_drivers::DriverRegistry;
use serde::{Deserialize, Serialize};

use crate::environment::PoolStrategy;
use crate::factory::DriverConnectionFactory;
use crate::pool::PoolConfig;

/// Deployment environment, from `APP_ENV`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Development,
    #[default]
    Production,
}

impl AppEnv {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => AppEnv::Development,
            _ => AppEnv::Production,
        }
    }

    pub fn from_env() -> Self {
        std::env::var("APP_ENV")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn is_development(&self) -> bool {
        matches!(self, AppEnv::Development)
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEnv::Development => f.write_str("dev"),
            AppEnv::Production => f.write_str("prod"),
        }
    }
}

/// Everything needed to build a pool, read from the environment.
///
/// | Variable | Default |
/// |---|---|
/// | `DB_DRIVER` | `mysql` |
/// | `DB_HOST` | `127.0.0.1` |
/// | `DB_PORT` | `3306` |
/// | `DB_NAME`, `DB_USER`, `DB_PASSWORD` | unset |
/// | `DB_CHARSET` | `utf8mb4` |
/// | `DB_PERSISTENT` | `false` |
/// | `DB_TCP_KEEPALIVE` | `60` (seconds, used when persistent) |
/// | `DB_CONNECT_TIMEOUT` | `5` (seconds) |
/// | `MAX_DB_CONNECTION_POOL` | `10` |
/// | `MIN_DB_CONNECTION_POOL` or `INITIAL_DB_CONNECTION_POOL` | `1` |
/// | `DB_CONNECTION_MAX_AGE` | `300` (seconds, at least 60) |
/// | `DB_POOL_CLEANUP_INTERVAL` | `60` (seconds) |
/// | `DB_POOL_FAILURE_THRESHOLD` | `5` |
/// | `DB_POOL_BREAKER_COOLDOWN` | `30` (seconds, `0` never closes) |
/// | `DB_POOL_STRATEGY` | detected |
/// | `APP_ENV` | `prod` |
///
/// Empty values count as unset.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub params: DatabaseParams,
    pub pool: PoolConfig,
    pub driver_options: DriverOptions,
    pub app_env: AppEnv,
    pub strategy: Option<PoolStrategy>,
}

impl DatabaseSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let driver = vars.get("DB_DRIVER").unwrap_or_else(|| "mysql".into());
        let mut params = DatabaseParams::new(&driver)
            .with_port(vars.parse("DB_PORT")?.unwrap_or(3306));
        if let Some(host) = vars.get("DB_HOST") {
            params = params.with_host(&host);
        }
        if let Some(database) = vars.get("DB_NAME") {
            params = params.with_database(&database);
        }
        if let Some(charset) = vars.get("DB_CHARSET") {
            params = params.with_charset(&validate_charset(&charset)?);
        }
        if let Some(user) = vars.get("DB_USER") {
            params = params.with_username(&user);
        }
        if let Some(password) = vars.get("DB_PASSWORD") {
            params = params.with_password(&password);
        }

        let connect_timeout = Duration::from_secs(vars.parse("DB_CONNECT_TIMEOUT")?.unwrap_or(5));
        let driver_options = DriverOptions::default()
            .with_connect_timeout(connect_timeout)
            .with_persistent(vars.flag("DB_PERSISTENT")?.unwrap_or(false))
            .with_keepalive(Duration::from_secs(
                vars.parse("DB_TCP_KEEPALIVE")?.unwrap_or(60),
            ));

        let min_size = match vars.parse("MIN_DB_CONNECTION_POOL")? {
            Some(min) => min,
            None => vars.parse("INITIAL_DB_CONNECTION_POOL")?.unwrap_or(1),
        };
        let cooldown = match vars.parse::<u64>("DB_POOL_BREAKER_COOLDOWN")?.unwrap_or(30) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let pool = PoolConfig::new(min_size, vars.parse("MAX_DB_CONNECTION_POOL")?.unwrap_or(10))
            .with_max_connection_age(Duration::from_secs(
                vars.parse("DB_CONNECTION_MAX_AGE")?.unwrap_or(300),
            ))
            .with_cleanup_interval(Duration::from_secs(
                vars.parse("DB_POOL_CLEANUP_INTERVAL")?.unwrap_or(60),
            ))
            .with_connect_timeout(connect_timeout)
            .with_failure_threshold(vars.parse("DB_POOL_FAILURE_THRESHOLD")?.unwrap_or(5))
            .with_breaker_cooldown(cooldown);
        pool.validate()?;

        let settings = Self {
            params,
            pool,
            driver_options,
            app_env: vars.get("APP_ENV").map(|v| AppEnv::parse(&v)).unwrap_or_default(),
            strategy: vars.parse("DB_POOL_STRATEGY")?,
        };
        tracing::debug!(
            driver = %settings.params.driver,
            endpoint = %settings.params.endpoint(),
            app_env = %settings.app_env,
            "database settings loaded"
        );
        Ok(settings)
    }

    /// A factory over the built-in drivers using these session options
    pub fn connection_factory(&self) -> DriverConnectionFactory {
        DriverConnectionFactory::new(DriverRegistry::with_defaults(), self.driver_options.clone())
    }
}

/// The charset ends up in a `SET NAMES` statement, so only plain
/// identifiers are accepted.
fn validate_charset(charset: &str) -> Result<String> {
    if charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(charset.to_string())
    } else {
        Err(DbPoolError::Configuration(format!(
            "Invalid value '{}' for DB_CHARSET: expected letters, digits or '_'",
            charset
        )))
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.parse().map_err(|e| {
                    DbPoolError::Configuration(format!("Invalid value '{}' for {}: {}", raw, name, e))
                })
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> Result<Option<bool>> {
        self.get(name)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(DbPoolError::Configuration(format!(
                    "Invalid value '{}' for {}: expected a boolean",
                    raw, name
                ))),
            })
            .transpose()
    }
}
