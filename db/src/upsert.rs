//! Insert-or-update.
//!
//! Engines with a single-statement upsert get it; the others run, inside
//! one transaction, an INSERT per row and fall back to an UPDATE keyed on
//! the unique field when the INSERT hits an integrity violation.

use std::sync::Arc;

use polysql_core::Value;
use tracing::debug;

use crate::args::Args;
use crate::connection::Connection;
use crate::error::{DbError, ErrorKind, Result};

/// An upsert being built. Created by [`Connection::upsert`].
///
/// # Examples
///
/// ```no_run
/// # fn demo(conn: &mut polysql_db::Connection) -> polysql_db::Result<()> {
/// let rows = conn
///     .upsert("variables")
///     .key("name")
///     .fields(["name", "value"])
///     .values(["site_name", "Example"])
///     .values(["site_mail", "admin@example.com"])
///     .execute()?;
/// assert_eq!(rows, 2);
/// # Ok(())
/// # }
/// ```
#[must_use = "an upsert does nothing until executed"]
pub struct Upsert<'c> {
    conn: &'c mut Connection,
    table: String,
    key: Option<String>,
    fields: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Connection {
    /// Starts an upsert into logical table `table`.
    pub fn upsert(&mut self, table: &str) -> Upsert<'_> {
        Upsert {
            conn: self,
            table: table.to_string(),
            key: None,
            fields: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl Upsert<'_> {
    /// The unique field that decides between insert and update.
    pub fn key(mut self, field: &str) -> Self {
        self.key = Some(field.to_string());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one row, values in field order.
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Runs the upsert and returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`Config`](DbError::Config) when the key is missing or not
    /// among the fields, or a row has the wrong number of values. Errors
    /// other than the integrity violation that triggers the update abort
    /// the whole upsert.
    pub fn execute(self) -> Result<u64> {
        let key = self
            .key
            .clone()
            .ok_or_else(|| DbError::Config("upsert requires a key field".to_string()))?;
        let key_index = self
            .fields
            .iter()
            .position(|f| *f == key)
            .ok_or_else(|| DbError::Config(format!("upsert key '{key}' is not among the fields")))?;
        if let Some(row) = self.rows.iter().find(|row| row.len() != self.fields.len()) {
            return Err(DbError::Config(format!(
                "upsert row has {} values for {} fields",
                row.len(),
                self.fields.len()
            )));
        }
        if self.rows.is_empty() {
            return Ok(0);
        }

        let Upsert {
            conn,
            table,
            fields,
            rows,
            ..
        } = self;
        let ext = Arc::clone(&conn.extension);
        let quoted_table = conn.names.table(&table);
        let quoted_fields: Vec<String> = fields.iter().map(|f| conn.names.field(f)).collect();
        let quoted_key = quoted_fields[key_index].clone();

        let mut txn = conn.start_transaction(None)?;
        if let Some(sql) = ext.upsert_sql(&quoted_table, &quoted_key, &quoted_fields) {
            for row in &rows {
                txn.execute_unprefixed(&sql, &row_args(row))?;
            }
        } else {
            let placeholders: Vec<String> = (0..fields.len()).map(|i| format!(":p{i}")).collect();
            let insert = format!(
                "INSERT INTO {quoted_table} ({}) VALUES ({})",
                quoted_fields.join(", "),
                placeholders.join(", ")
            );
            let assignments: Vec<String> = quoted_fields
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != key_index)
                .map(|(i, f)| format!("{f} = :p{i}"))
                .collect();
            let update = format!(
                "UPDATE {quoted_table} SET {} WHERE {quoted_key} = :p{key_index}",
                assignments.join(", ")
            );
            for row in &rows {
                let args = row_args(row);
                match txn.execute_unprefixed(&insert, &args) {
                    Ok(_) => {}
                    Err(err) if err.kind() == ErrorKind::IntegrityViolation => {
                        debug!(table = %table, key = %key, "row exists, updating");
                        if !assignments.is_empty() {
                            txn.execute_unprefixed(&update, &args)?;
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        txn.commit()?;
        Ok(rows.len() as u64)
    }
}

fn row_args(row: &[Value]) -> Args {
    row.iter()
        .enumerate()
        .fold(Args::new(), |args, (i, value)| args.bind(&format!("p{i}"), value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::error::DriverError;
    use crate::extension::SqliteExtension;
    use crate::testing::ScriptedClient;

    fn emulated(client: &ScriptedClient) -> Connection {
        let config = ConnectionConfig::new("sqlite", "site").with_prefix("p_");
        let conn = Connection::with_extension(
            config,
            client.boxed(),
            Arc::new(SqliteExtension::without_native_upsert()),
        )
        .unwrap();
        client.clear_statements();
        conn
    }

    #[test]
    fn test_emulated_upsert_updates_on_conflict() {
        let client = ScriptedClient::new();
        let mut conn = emulated(&client);
        client.fail_on(
            "INSERT INTO p_kv",
            DriverError::new(2067, "UNIQUE constraint failed: p_kv.name"),
        );
        let rows = conn
            .upsert("kv")
            .key("name")
            .fields(["name", "value"])
            .values(["a", "1"])
            .values(["b", "2"])
            .execute()
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            client.statements(),
            vec![
                "BEGIN IMMEDIATE",
                "INSERT INTO p_kv (name, value) VALUES (:p0, :p1)",
                "UPDATE p_kv SET value = :p1 WHERE name = :p0",
                "INSERT INTO p_kv (name, value) VALUES (:p0, :p1)",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_other_errors_abort() {
        let client = ScriptedClient::new();
        let mut conn = emulated(&client);
        client.fail_on("INSERT INTO p_kv", DriverError::new(1, "no such table: p_kv"));
        let err = conn
            .upsert("kv")
            .key("name")
            .fields(["name", "value"])
            .values(["a", "1"])
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Driver);
        assert_eq!(client.statements().last().map(String::as_str), Some("ROLLBACK"));
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_native_upsert_uses_one_statement_per_row() {
        let client = ScriptedClient::new();
        let mut conn = Connection::from_client(ConnectionConfig::new("mysql", "site"), client.boxed()).unwrap();
        client.clear_statements();
        conn.upsert("kv")
            .key("name")
            .fields(["name", "value"])
            .values(["a", "1"])
            .execute()
            .unwrap();
        assert_eq!(
            client.statements(),
            vec![
                "START TRANSACTION",
                "INSERT INTO kv (name, value) VALUES (?, ?) ON DUPLICATE KEY UPDATE value = VALUES(value)",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_invalid_upserts_are_rejected() {
        let client = ScriptedClient::new();
        let mut conn = emulated(&client);
        let err = conn.upsert("kv").fields(["name"]).values(["a"]).execute().unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        let err = conn
            .upsert("kv")
            .key("id")
            .fields(["name"])
            .values(["a"])
            .execute()
            .unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        let err = conn
            .upsert("kv")
            .key("name")
            .fields(["name", "value"])
            .values(["a"])
            .execute()
            .unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        assert!(client.statements().is_empty());
    }

    #[test]
    fn test_empty_upsert_does_nothing() {
        let client = ScriptedClient::new();
        let mut conn = emulated(&client);
        let rows = conn.upsert("kv").key("name").fields(["name"]).execute().unwrap();
        assert_eq!(rows, 0);
        assert!(client.statements().is_empty());
    }
}
