//! Connection parameters and pool identity

use ring::digest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters needed to open a database session.
///
/// Two parameter sets that produce the same [`PoolKey`] describe
/// interchangeable connections.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseParams {
    /// Driver ID (e.g., "mysql")
    pub driver: String,
    /// Host address
    pub host: String,
    /// Port number (0 for the driver default)
    pub port: u16,
    /// Database name
    pub database: Option<String>,
    /// Connection character set
    pub charset: String,
    /// Username
    pub username: Option<String>,
    /// Password
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl DatabaseParams {
    /// Create parameters for the given driver with local defaults
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            database: None,
            charset: "utf8mb4".to_string(),
            username: None,
            password: None,
        }
    }

    /// Create MySQL parameters
    pub fn new_mysql(host: &str, port: u16, database: &str, username: &str) -> Self {
        Self::new("mysql")
            .with_host(host)
            .with_port(port)
            .with_database(database)
            .with_username(username)
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// `host:port` for log output
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Derive the pool identity for these parameters.
    pub fn pool_key(&self) -> PoolKey {
        let mut ctx = digest::Context::new(&digest::SHA256);
        let port = self.port.to_string();
        let fields = [
            self.driver.as_str(),
            self.host.as_str(),
            port.as_str(),
            self.database.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or(""),
        ];
        for field in fields {
            ctx.update(field.as_bytes());
            // Separator keeps ("ab", "c") and ("a", "bc") apart
            ctx.update(&[0]);
        }
        PoolKey(hex::encode(ctx.finish().as_ref()))
    }
}

impl fmt::Debug for DatabaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseParams")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Identity of a logical pool, derived from [`DatabaseParams`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey(String);

impl PoolKey {
    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pool_key_is_stable() {
        let a = DatabaseParams::new_mysql("db", 3306, "app", "root").with_password("secret");
        let b = DatabaseParams::new_mysql("db", 3306, "app", "root").with_password("secret");
        assert_eq!(a.pool_key(), b.pool_key());
        assert_eq!(a.pool_key().as_str().len(), 64);
    }

    #[test]
    fn test_pool_key_distinguishes_backends() {
        let base = DatabaseParams::new_mysql("db", 3306, "app", "root");
        assert_ne!(base.pool_key(), base.clone().with_port(3307).pool_key());
        assert_ne!(base.pool_key(), base.clone().with_database("other").pool_key());
        assert_ne!(base.pool_key(), base.clone().with_password("x").pool_key());
        assert_ne!(base.pool_key(), base.clone().with_username("app").pool_key());
    }

    #[test]
    fn test_pool_key_ignores_charset() {
        let base = DatabaseParams::new_mysql("db", 3306, "app", "root");
        assert_eq!(base.pool_key(), base.clone().with_charset("latin1").pool_key());
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let a = DatabaseParams::new("mysql").with_host("ab").with_database("c");
        let b = DatabaseParams::new("mysql").with_host("a").with_database("bc");
        assert_ne!(a.pool_key(), b.pool_key());
    }

    #[test]
    fn test_debug_masks_password() {
        let params = DatabaseParams::new_mysql("db", 3306, "app", "root").with_password("hunter2");
        let debug = format!("{:?}", params);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_password_not_serialized() {
        let params = DatabaseParams::new("mysql").with_password("hunter2");
        let json = serde_json::to_string(&params).expect("serialize");
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_display_uses_short_key() {
        let key = DatabaseParams::new("mysql").pool_key();
        assert_eq!(key.to_string().len(), 12);
        assert!(key.as_str().starts_with(key.short()));
    }
}
