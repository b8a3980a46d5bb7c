//! The boundary to the underlying client library.
//!
//! A [`Client`] is the opaque, engine-specific driver: it prepares and runs
//! statements and reports raw [`DriverError`]s. It knows nothing about
//! prefixes, placeholders rewriting, transactions stacks or retries; those
//! live in [`Connection`](crate::Connection).

use polysql_core::Value;

use crate::error::DriverError;

/// Bound arguments in the form the client expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    /// Values for `?` placeholders, in order.
    Positional(Vec<Value>),
    /// Values for `:name` placeholders. Names include the leading colon.
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }
}

/// Result of a statement that does not return rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// Rows reported as affected by the driver.
    pub rows_affected: u64,
    /// Id generated by the statement, when the engine reports one.
    pub last_insert_id: Option<i64>,
    /// Free-form status text some drivers return (e.g. "Rows matched: 1
    /// Changed: 0 Warnings: 0").
    pub info: Option<String>,
}

/// Rows returned by a query, fully materialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Builds a result set from column names and rows.
    ///
    /// # Examples
    ///
    /// ```
    /// use polysql_core::Value;
    /// use polysql_db::ResultSet;
    ///
    /// let rs = ResultSet::new(["count"], vec![vec![Value::Integer(3)]]);
    /// assert_eq!(rs.columns, vec!["count".to_string()]);
    /// assert_eq!(rs.scalar(), Some(&Value::Integer(3)));
    /// ```
    pub fn new<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// An open session of the underlying client library.
///
/// Implementations are blocking and used from one thread at a time.
pub trait Client: Send {
    /// Compiles `sql` ahead of execution. Clients that cache prepared
    /// statements do so here; the default does nothing.
    fn prepare(&mut self, _sql: &str) -> Result<(), DriverError> {
        Ok(())
    }

    /// Runs a statement that does not return rows.
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecOutcome, DriverError>;

    /// Runs a statement and returns every row.
    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, DriverError>;

    /// Whether the server has an open transaction on this session.
    fn in_transaction(&self) -> bool;

    /// Version string of the client library.
    fn client_version(&self) -> String;
}
