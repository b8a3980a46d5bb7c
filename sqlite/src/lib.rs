//! SQLite client for polysql connections.
//!
//! This crate supplies the [`Client`](polysql_db::Client) behind
//! connections whose driver is `sqlite` (or one of its aliases). It wraps
//! a bundled `rusqlite` connection; everything engine-specific above the
//! client (DDL dialect, table rebuilds, error classification) lives in
//! [`SqliteExtension`](polysql_db::SqliteExtension).
//!
//! # Quick start
//!
//! ```no_run
//! use polysql_core::{FieldSpec, NewKeys, TableSpec};
//! use polysql_db::Args;
//!
//! let mut conn = polysql_sqlite::open("site.db", "app_").unwrap();
//! conn.schema()
//!     .create_table(
//!         &TableSpec::new("users")
//!             .with_field(FieldSpec::serial("uid"))
//!             .with_field(FieldSpec::varchar("name", 32))
//!             .with_primary_key(["uid"]),
//!     )
//!     .unwrap();
//! conn.execute("INSERT INTO {users} (name) VALUES (:name)", Args::new().bind("name", "admin"))
//!     .unwrap();
//!
//! // SQLite has no in-place column change; the table is rebuilt.
//! conn.schema()
//!     .change_field(
//!         "users",
//!         "name",
//!         FieldSpec::varchar("name", 64).not_null().default(""),
//!         NewKeys::default(),
//!     )
//!     .unwrap();
//! ```
//!
//! # Configuration files
//!
//! [`connect`] takes a full [`ConnectionConfig`], as loaded from YAML by
//! [`ConnectionConfig::load`].

mod client;
mod convert;
mod error;

use std::path::Path;
use std::sync::Arc;

use polysql_db::{Client, Connection, ConnectionConfig, DbError, DriverError, Engine, Extension, Result, registry};

pub use client::SqliteClient;

/// Opens a connection described by `config`.
///
/// # Errors
///
/// Returns [`Config`](DbError::Config) when the driver is not a SQLite
/// driver, [`UnknownEngine`](DbError::UnknownEngine) when it is not known
/// at all, and [`ConnectionFailure`](DbError::ConnectionFailure) when the
/// database cannot be opened.
pub fn connect(config: ConnectionConfig) -> Result<Connection> {
    let extension = registry::extension(&config.driver)?;
    connect_with_extension(config, extension)
}

/// Like [`connect`] with an explicit extension, for example
/// [`SqliteExtension::without_native_upsert`](polysql_db::SqliteExtension::without_native_upsert).
pub fn connect_with_extension(
    config: ConnectionConfig,
    extension: Arc<dyn Extension>,
) -> Result<Connection> {
    if extension.engine() != Engine::Sqlite {
        return Err(DbError::Config(format!(
            "driver '{}' is not a sqlite driver",
            config.driver
        )));
    }
    Connection::open_with_extension(config, extension, open_client)
}

/// Opens the database file at `path` with table prefix `prefix`.
pub fn open(path: impl AsRef<Path>, prefix: &str) -> Result<Connection> {
    let database = path.as_ref().to_string_lossy().into_owned();
    connect(ConnectionConfig::new("sqlite", database).with_prefix(prefix))
}

/// Opens a private in-memory database with table prefix `prefix`.
pub fn open_in_memory(prefix: &str) -> Result<Connection> {
    connect(ConnectionConfig::new("sqlite", ":memory:").with_prefix(prefix))
}

fn open_client(config: &ConnectionConfig) -> std::result::Result<Box<dyn Client>, DriverError> {
    Ok(SqliteClient::open(&config.database)?.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_runs_session_setup() {
        let mut conn = open_in_memory("").unwrap();
        assert_eq!(conn.engine(), Engine::Sqlite);
        let mut result = conn.query("PRAGMA foreign_keys", ()).unwrap();
        assert_eq!(result.fetch_field(0), Some(polysql_core::Value::Integer(1)));
        assert!(!conn.server_version().unwrap().is_empty());
    }

    #[test]
    fn test_other_engines_are_refused() {
        let err = connect(ConnectionConfig::new("mysql", "site")).unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        let err = connect(ConnectionConfig::new("postgres", "site")).unwrap_err();
        assert!(matches!(err, DbError::UnknownEngine(_)));
    }

    #[test]
    fn test_unopenable_path_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("site.db");
        let err = open(&path, "").unwrap_err();
        assert!(matches!(err, DbError::ConnectionFailure { .. }));
    }
}
