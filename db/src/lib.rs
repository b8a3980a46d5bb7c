//! Connections, engine extensions, transactions and schema migration.
//!
//! This crate turns the engine-neutral model of `polysql-core` into SQL for
//! one concrete engine. A [`Connection`] owns a driver [`Client`], the
//! [`Extension`] picked for its driver name by the [`registry`], the table
//! prefix, and a cached [`SchemaSnapshot`](polysql_core::SchemaSnapshot).
//!
//! # Quick start
//!
//! ```no_run
//! use polysql_core::{FieldSpec, TableSpec};
//! use polysql_db::{Args, Connection, ConnectionConfig};
//!
//! # fn demo(client: Box<dyn polysql_db::Client>) -> polysql_db::Result<()> {
//! let config = ConnectionConfig::new("sqlite", "site.db").with_prefix("app_");
//! let mut conn = Connection::from_client(config, client)?;
//!
//! conn.schema().create_table(
//!     &TableSpec::new("users")
//!         .with_field(FieldSpec::serial("uid"))
//!         .with_field(FieldSpec::varchar("name", 60).not_null().default(""))
//!         .with_primary_key(["uid"])
//!         .with_unique_key("name", ["name"]),
//! )?;
//!
//! let mut txn = conn.start_transaction(None)?;
//! txn.execute("INSERT INTO {users} (name) VALUES (:name)", Args::new().bind("name", "admin"))?;
//! txn.commit()?;
//!
//! let id = conn.next_id(0)?;
//! # let _ = id;
//! # Ok(())
//! # }
//! ```
//!
//! # Engines
//!
//! | Driver names              | Extension                     |
//! |---------------------------|-------------------------------|
//! | `mysql`, `mysqli`, `mariadb`, `pdo_mysql` | [`MysqlExtension`] |
//! | `sqlite`, `sqlite3`, `pdo_sqlite` | [`SqliteExtension`]   |
//! | `oracle`, `oci`, `oci8`, `pdo_oci` | [`OracleExtension`] |
//!
//! Driver clients live in their own crates (`polysql-sqlite` for SQLite);
//! [`testing::ScriptedClient`] stands in for a server in tests.

mod args;
mod client;
mod config;
mod connection;
mod error;
pub mod extension;
mod migration;
pub mod registry;
mod sequence;
mod statement;
pub mod testing;
mod transaction;
mod upsert;

pub use args::Args;
pub use client::{Client, ExecOutcome, Params, ResultSet};
pub use config::{ConnectionConfig, RetryPolicy, validate_prefix};
pub use connection::Connection;
pub use error::{DbError, DriverError, ErrorKind, QueryContext, Result};
pub use extension::{
    Applied, ConnectionHooks, Extension, MysqlExtension, OperatorMapping, OracleExtension,
    Outcome, ReleaseFailure, SchemaHooks, SqliteExtension, StatementHooks, TransactionHooks,
};
pub use migration::Schema;
pub use registry::Engine;
pub use sequence::{SEQUENCES_TABLE, sequences_table};
pub use statement::{FetchMode, Fetched, PreparedQuery, QueryResult};
pub use transaction::{ROOT_TRANSACTION, Transaction, TransactionStack};
pub use upsert::Upsert;
