//! Engine registry.
//!
//! Maps a driver identifier to its engine and extension. Identifiers go
//! through a single-level alias table first (`mysql` → `pdo_mysql`,
//! `sqlite3` → `pdo_sqlite`, `oracle` → `oci`), case-insensitively. Both
//! tables are process-wide, read-only, and built on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{DbError, Result};
use crate::extension::{Extension, MysqlExtension, OracleExtension, SqliteExtension};

/// The supported engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Mysql,
    Sqlite,
    Oracle,
}

impl Engine {
    /// Canonical driver key.
    pub fn driver(self) -> &'static str {
        match self {
            Engine::Mysql => "pdo_mysql",
            Engine::Sqlite => "pdo_sqlite",
            Engine::Oracle => "oci",
        }
    }

    /// Platform name reported by non-strict version introspection.
    pub fn platform(self) -> &'static str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Sqlite => "sqlite",
            Engine::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.platform())
    }
}

type Factory = fn() -> Arc<dyn Extension>;

static ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("mysql", "pdo_mysql"),
        ("mysqli", "pdo_mysql"),
        ("mariadb", "pdo_mysql"),
        ("sqlite", "pdo_sqlite"),
        ("sqlite3", "pdo_sqlite"),
        ("oracle", "oci"),
        ("oci8", "oci"),
        ("pdo_oci", "oci"),
    ])
});

static ENGINES: LazyLock<HashMap<&'static str, (Engine, Factory)>> = LazyLock::new(|| {
    let mysql: Factory = || Arc::new(MysqlExtension::new()) as Arc<dyn Extension>;
    let sqlite: Factory = || Arc::new(SqliteExtension::new()) as Arc<dyn Extension>;
    let oracle: Factory = || Arc::new(OracleExtension::new()) as Arc<dyn Extension>;
    HashMap::from([
        ("pdo_mysql", (Engine::Mysql, mysql)),
        ("pdo_sqlite", (Engine::Sqlite, sqlite)),
        ("oci", (Engine::Oracle, oracle)),
    ])
});

fn lookup(driver: &str) -> Result<(&'static str, Engine, Factory)> {
    let key = driver.trim().to_ascii_lowercase();
    let canonical = ALIASES.get(key.as_str()).copied().unwrap_or(key.as_str());
    ENGINES
        .get_key_value(canonical)
        .map(|(name, (engine, factory))| (*name, *engine, *factory))
        .ok_or_else(|| DbError::UnknownEngine(driver.to_string()))
}

/// Canonical driver key for `driver`.
///
/// # Examples
///
/// ```
/// use polysql_db::registry::canonical_driver;
///
/// assert_eq!(canonical_driver("MySQL").unwrap(), "pdo_mysql");
/// assert_eq!(canonical_driver("pdo_sqlite").unwrap(), "pdo_sqlite");
/// assert!(canonical_driver("pgsql").is_err());
/// ```
pub fn canonical_driver(driver: &str) -> Result<&'static str> {
    lookup(driver).map(|(name, _, _)| name)
}

/// Engine family for `driver`.
///
/// # Errors
///
/// Returns [`UnknownEngine`](DbError::UnknownEngine) for identifiers
/// outside the registry.
pub fn engine(driver: &str) -> Result<Engine> {
    lookup(driver).map(|(_, engine, _)| engine)
}

/// A new extension instance for `driver`.
///
/// # Errors
///
/// Returns [`UnknownEngine`](DbError::UnknownEngine) for identifiers
/// outside the registry.
pub fn extension(driver: &str) -> Result<Arc<dyn Extension>> {
    lookup(driver).map(|(_, _, factory)| factory())
}
