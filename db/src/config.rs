//! Connection configuration.
//!
//! Defines the YAML-serializable settings for one database connection: the
//! engine, where to connect, the table prefix, extra session statements, and
//! the lock-timeout retry policy.
//!
//! # Example YAML
//!
//! ```yaml
//! driver: sqlite
//! database: ./site.db
//! prefix: "app_"
//! init_commands:
//!   - "PRAGMA cache_size = -2000"
//! retry:
//!   max_attempts: 5
//!   interval_ms: 50
//! debug: false
//! ```

use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// Bounded retry of writes that failed on a lock timeout or deadlock.
///
/// # Examples
///
/// ```
/// # use polysql_db::RetryPolicy;
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 5);
/// assert_eq!(policy.interval().as_millis(), 50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed sleep between attempts, in milliseconds.
    pub interval_ms: u64,
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            interval_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_ms: 50,
        }
    }
}

/// Settings for one database connection.
///
/// # Examples
///
/// ```
/// use polysql_db::ConnectionConfig;
///
/// let config = ConnectionConfig::new("sqlite", ":memory:").with_prefix("app_");
/// assert_eq!(config.prefix, "app_");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Engine identifier; aliases such as `mysql` or `sqlite3` are accepted.
    pub driver: String,
    /// Database file path or database name.
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Table name prefix.
    #[serde(default)]
    pub prefix: String,
    /// Extra statements run right after the connection opens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_commands: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Log every statement at info level.
    #[serde(default)]
    pub debug: bool,
}

impl ConnectionConfig {
    pub fn new(driver: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            database: database.into(),
            host: None,
            port: None,
            username: None,
            password: None,
            prefix: String::new(),
            init_commands: Vec::new(),
            retry: RetryPolicy::default(),
            debug: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_init_command(mut self, sql: impl Into<String>) -> Self {
        self.init_commands.push(sql.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::DbError::Io) if the file cannot be read, or
    /// [`Yaml`](crate::DbError::Yaml) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::DbError::Io) if the file cannot be written, or
    /// [`Yaml`](crate::DbError::Yaml) if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks the prefix and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`Config`](crate::DbError::Config) when the prefix contains
    /// characters other than ASCII alphanumerics and underscores, or when
    /// the retry policy allows no attempt at all.
    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.prefix)?;
        if self.retry.max_attempts == 0 {
            return Err(DbError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validates a table prefix. Empty prefixes are allowed.
///
/// # Examples
///
/// ```
/// use polysql_db::validate_prefix;
///
/// assert!(validate_prefix("").is_ok());
/// assert!(validate_prefix("site1_").is_ok());
/// assert!(validate_prefix("bad-prefix").is_err());
/// ```
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DbError::Config(format!(
            "invalid prefix '{prefix}': use only letters, digits and underscores"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
driver: mysql
database: site
host: db.internal
port: 3306
username: app
prefix: "app_"
init_commands:
  - "SET SESSION wait_timeout = 600"
retry:
  max_attempts: 3
  interval_ms: 10
debug: true
"#
    }

    #[test]
    fn test_deserialize_complete() {
        let config: ConnectionConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.driver, "mysql");
        assert_eq!(config.host.as_deref(), Some("db.internal"));
        assert_eq!(config.port, Some(3306));
        assert_eq!(config.prefix, "app_");
        assert_eq!(config.init_commands.len(), 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.debug);
    }

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: ConnectionConfig =
            serde_yaml::from_str("driver: sqlite\ndatabase: ':memory:'\n").unwrap();
        assert_eq!(config.prefix, "");
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(!config.debug);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = ConnectionConfig::new("sqlite", ":memory:").with_retry(RetryPolicy {
            max_attempts: 0,
            interval_ms: 0,
        });
        assert!(matches!(config.validate(), Err(DbError::Config(_))));
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.yml");

        let original: ConnectionConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        original.save(&path).unwrap();

        let loaded = ConnectionConfig::load(&path).unwrap();
        assert_eq!(loaded, original);
    }
}
