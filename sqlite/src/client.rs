//! The `rusqlite`-backed [`Client`].

use std::path::Path;

use polysql_db::{Client, DriverError, ExecOutcome, Params, ResultSet};
use rusqlite::{Connection, Statement};
use tracing::debug;

use crate::convert;
use crate::error::{RANGE, driver_error};

/// Prepared statements kept per connection.
const STATEMENT_CACHE: usize = 64;

/// A SQLite database session.
///
/// Statements are prepared through the `rusqlite` statement cache, so the
/// [`prepare`](Client::prepare) call the connection makes before running a
/// statement compiles it once for every later execution.
///
/// # Examples
///
/// ```
/// use polysql_core::Value;
/// use polysql_db::{Client, Params};
/// use polysql_sqlite::SqliteClient;
///
/// let mut client = SqliteClient::open_in_memory().unwrap();
/// client.execute("CREATE TABLE t (a INTEGER)", &Params::None).unwrap();
/// let outcome = client
///     .execute("INSERT INTO t (a) VALUES (?)", &Params::Positional(vec![Value::Integer(7)]))
///     .unwrap();
/// assert_eq!(outcome.rows_affected, 1);
/// assert_eq!(outcome.last_insert_id, Some(1));
/// ```
pub struct SqliteClient {
    conn: Connection,
}

impl SqliteClient {
    /// Opens the database file at `path`, creating it if needed. The path
    /// `:memory:` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(driver_error)?;
        debug!(path = %path.display(), "sqlite database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, DriverError> {
        Self::open(":memory:")
    }

    /// Wraps an open `rusqlite` connection.
    pub fn from_connection(conn: Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE);
        Self { conn }
    }

    /// The underlying `rusqlite` connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn boxed(self) -> Box<dyn Client> {
        Box::new(self)
    }
}

impl Client for SqliteClient {
    fn prepare(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn.prepare_cached(sql).map(|_| ()).map_err(driver_error)
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecOutcome, DriverError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(driver_error)?;
        bind(&mut stmt, params)?;
        if stmt.column_count() > 0 {
            // statements such as PRAGMA assignments report rows; drain them
            let mut rows = stmt.raw_query();
            while rows.next().map_err(driver_error)?.is_some() {}
            return Ok(ExecOutcome::default());
        }
        let changed = stmt.raw_execute().map_err(driver_error)?;
        let last_insert_id =
            (changed > 0 && convert::is_insert(sql)).then(|| self.conn.last_insert_rowid());
        Ok(ExecOutcome {
            rows_affected: changed as u64,
            last_insert_id,
            info: None,
        })
    }

    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, DriverError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(driver_error)?;
        bind(&mut stmt, params)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut fetched = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(driver_error)? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(convert::from_sql(row.get_ref(index).map_err(driver_error)?));
            }
            fetched.push(values);
        }
        Ok(ResultSet {
            columns,
            rows: fetched,
        })
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn client_version(&self) -> String {
        rusqlite::version().to_string()
    }
}

fn bind(stmt: &mut Statement<'_>, params: &Params) -> Result<(), DriverError> {
    match params {
        Params::None => {}
        Params::Positional(values) => {
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, convert::to_sql(value))
                    .map_err(driver_error)?;
            }
        }
        Params::Named(values) => {
            for (name, value) in values {
                let index = stmt
                    .parameter_index(name)
                    .map_err(driver_error)?
                    .ok_or_else(|| DriverError::new(RANGE, format!("unknown parameter {name}")))?;
                stmt.raw_bind_parameter(index, convert::to_sql(value))
                    .map_err(driver_error)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use polysql_core::Value;

    use super::*;

    fn client() -> SqliteClient {
        let mut client = SqliteClient::open_in_memory().unwrap();
        client
            .execute("CREATE TABLE kv (name TEXT PRIMARY KEY, value TEXT)", &Params::None)
            .unwrap();
        client
    }

    #[test]
    fn test_named_parameters() {
        let mut client = client();
        let params = Params::Named(vec![
            (":name".to_string(), Value::from("a")),
            (":value".to_string(), Value::from("1")),
        ]);
        client
            .execute("INSERT INTO kv (name, value) VALUES (:name, :value)", &params)
            .unwrap();
        let rs = client
            .query(
                "SELECT value FROM kv WHERE name = :name",
                &Params::Named(vec![(":name".to_string(), Value::from("a"))]),
            )
            .unwrap();
        assert_eq!(rs.columns, vec!["value".to_string()]);
        assert_eq!(rs.scalar(), Some(&Value::from("1")));
    }

    #[test]
    fn test_unknown_parameter_is_reported() {
        let mut client = client();
        let err = client
            .query(
                "SELECT value FROM kv WHERE name = :name",
                &Params::Named(vec![(":other".to_string(), Value::from("a"))]),
            )
            .unwrap_err();
        assert_eq!(err.code, RANGE);
    }

    #[test]
    fn test_pragma_with_result_runs_as_statement() {
        let mut client = client();
        let outcome = client.execute("PRAGMA busy_timeout = 5000", &Params::None).unwrap();
        assert_eq!(outcome.rows_affected, 0);
        let rs = client.query("PRAGMA busy_timeout", &Params::None).unwrap();
        assert_eq!(rs.scalar(), Some(&Value::Integer(5000)));
    }

    #[test]
    fn test_update_reports_no_insert_id() {
        let mut client = client();
        client
            .execute("INSERT INTO kv (name, value) VALUES ('a', '1')", &Params::None)
            .unwrap();
        let outcome = client.execute("UPDATE kv SET value = '2'", &Params::None).unwrap();
        assert_eq!(outcome.rows_affected, 1);
        assert_eq!(outcome.last_insert_id, None);
    }

    #[test]
    fn test_transaction_state_follows_server() {
        let mut client = client();
        assert!(!client.in_transaction());
        client.execute("BEGIN IMMEDIATE", &Params::None).unwrap();
        assert!(client.in_transaction());
        client.execute("COMMIT", &Params::None).unwrap();
        assert!(!client.in_transaction());
    }

    #[test]
    fn test_constraint_failure_code() {
        let mut client = client();
        client
            .execute("INSERT INTO kv (name) VALUES ('a')", &Params::None)
            .unwrap();
        let err = client
            .execute("INSERT INTO kv (name) VALUES ('a')", &Params::None)
            .unwrap_err();
        assert_eq!(err.code & 0xff, 19);
    }
}
