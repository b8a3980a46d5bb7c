//! Connection-wide id sequence.
//!
//! Ids come from the `{prefix}sequences` table. The generic path keeps one
//! row and moves it forward under a row lock; engines with a cheaper native
//! mechanism take over through
//! [`SchemaHooks::next_sequence_value`](crate::extension::SchemaHooks::next_sequence_value).

use std::sync::Arc;

use polysql_core::{FieldSpec, SizeClass, TableSpec};
use tracing::debug;

use crate::connection::Connection;
use crate::error::Result;
use crate::extension::{Outcome, column_int};
use crate::registry::Engine;

/// Logical name of the sequences table.
pub const SEQUENCES_TABLE: &str = "sequences";

/// Specification of the sequences table for `engine`.
///
/// MySQL keeps one auto-increment row per id handed out and trims old rows;
/// every other engine keeps a single counter row.
pub fn sequences_table(engine: Engine) -> TableSpec {
    let table = TableSpec::new(SEQUENCES_TABLE).with_description("Stores the id sequence");
    match engine {
        Engine::Mysql => table
            .with_field(FieldSpec::serial("value").size(SizeClass::Big))
            .with_primary_key(["value"]),
        _ => table.with_field(
            FieldSpec::int("value")
                .size(SizeClass::Big)
                .not_null()
                .default(0),
        ),
    }
}

impl Connection {
    /// Next id of the connection-wide sequence, strictly greater than both
    /// every id handed out before and `watermark`.
    ///
    /// Callers importing rows with their own ids pass the largest imported
    /// id as `watermark`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn demo(conn: &mut polysql_db::Connection) -> polysql_db::Result<()> {
    /// let first = conn.next_id(0)?;
    /// let second = conn.next_id(100)?;
    /// assert!(second > 100 && second > first);
    /// # Ok(())
    /// # }
    /// ```
    pub fn next_id(&mut self, watermark: i64) -> Result<i64> {
        let ext = Arc::clone(&self.extension);
        if let Outcome::Handled(id) = ext.next_sequence_value(self, watermark)? {
            debug!(id, watermark, "sequence advanced natively");
            return Ok(id);
        }
        self.ensure_sequences_table()?;

        let table = self.names.table(SEQUENCES_TABLE);
        let field = self.names.field("value");
        let select = format!("SELECT {field} FROM {table}{}", ext.for_update_clause());
        let mut txn = self.start_transaction(None)?;
        let stored = txn
            .query_catalog(&select, ())?
            .first()
            .and_then(|row| column_int(row, "value"));
        let id = stored.unwrap_or(0).max(watermark) + 1;
        let write = match stored {
            Some(_) => format!("UPDATE {table} SET {field} = {id}"),
            None => format!("INSERT INTO {table} ({field}) VALUES ({id})"),
        };
        txn.execute_raw(&write)?;
        txn.commit()?;
        debug!(id, watermark, "sequence advanced");
        Ok(id)
    }

    /// Creates the sequences table unless it exists.
    pub(crate) fn ensure_sequences_table(&mut self) -> Result<()> {
        if self
            .snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(SEQUENCES_TABLE))
        {
            return Ok(());
        }
        if self.schema().table_exists(SEQUENCES_TABLE)? {
            return Ok(());
        }
        let spec = sequences_table(self.engine());
        self.schema().create_table(&spec)
    }
}

#[cfg(test)]
mod tests {
    use polysql_core::{FieldType, SchemaSnapshot, Value};

    use super::*;
    use crate::client::ResultSet;
    use crate::config::ConnectionConfig;
    use crate::extension::{SchemaHooks, SqliteExtension};
    use crate::testing::ScriptedClient;

    fn connect(client: &ScriptedClient, driver: &str) -> Connection {
        let mut conn =
            Connection::from_client(ConnectionConfig::new(driver, "site"), client.boxed()).unwrap();
        let ext = Arc::clone(conn.extension());
        conn.set_schema_snapshot(
            SchemaSnapshot::new().with_table(ext.normalize_table(sequences_table(conn.engine()))),
        );
        client.clear_statements();
        conn
    }

    #[test]
    fn test_sequences_table_shape() {
        let generic = sequences_table(Engine::Sqlite);
        assert_eq!(generic.fields[0].field_type, FieldType::Int);
        assert!(generic.primary_key.is_empty());
        let mysql = sequences_table(Engine::Mysql);
        assert_eq!(mysql.fields[0].field_type, FieldType::Serial);
        assert_eq!(mysql.primary_key, polysql_core::columns(["value"]));
    }

    #[test]
    fn test_first_id_inserts_counter_row() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, "sqlite");
        assert_eq!(conn.next_id(0).unwrap(), 1);
        assert_eq!(
            client.statements(),
            vec![
                "BEGIN IMMEDIATE",
                "SELECT value FROM sequences",
                "INSERT INTO sequences (value) VALUES (1)",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_watermark_moves_counter_forward() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, "oracle");
        client.on_query("FROM sequences", ResultSet::new(["value"], vec![vec![Value::Integer(7)]]));
        assert_eq!(conn.next_id(41).unwrap(), 42);
        client.on_query("FROM sequences", ResultSet::new(["value"], vec![vec![Value::Integer(42)]]));
        assert_eq!(conn.next_id(3).unwrap(), 43);
        let statements = client.statements();
        assert!(statements.contains(&"SELECT value FROM sequences FOR UPDATE".to_string()));
        assert!(statements.contains(&"UPDATE sequences SET value = 42".to_string()));
        assert!(statements.contains(&"UPDATE sequences SET value = 43".to_string()));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, "sqlite");
        client.fail_on("INSERT INTO sequences", crate::error::DriverError::new(19, "constraint failed"));
        assert!(conn.next_id(0).is_err());
        assert!(!conn.in_transaction());
        assert_eq!(client.statements().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_missing_table_is_created() {
        let client = ScriptedClient::new();
        let mut conn =
            Connection::from_client(ConnectionConfig::new("sqlite", "site"), client.boxed()).unwrap();
        conn.set_schema_snapshot(SchemaSnapshot::new());
        client.clear_statements();
        conn.next_id(0).unwrap();
        let statements = client.statements();
        let create = SqliteExtension::new()
            .create_table_sql(&mut polysql_core::Resolver::new("", polysql_core::QuoteStyle::DoubleQuote), &sequences_table(Engine::Sqlite))
            .remove(0);
        assert!(statements.contains(&create));
        assert!(statements.contains(&"INSERT INTO sequences (value) VALUES (1)".to_string()));
    }
}
