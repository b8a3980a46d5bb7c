//! The engine extension contract.
//!
//! Every engine-specific branch of the connection funnels through one
//! [`Extension`] object, chosen once per connection from the
//! [`registry`](crate::registry). The contract is split into capability
//! groups:
//!
//! - [`ConnectionHooks`]: session setup, versions, identifier rules.
//! - [`StatementHooks`]: placeholders, row counts, fetched-row processing,
//!   pagination, error classification, upsert.
//! - [`TransactionHooks`]: transaction and savepoint statements, DDL
//!   semantics, savepoint-release failure handling.
//! - [`SchemaHooks`]: type mapping, DDL generation, introspection, and the
//!   declinable schema operations.
//!
//! Declinable operations return [`Outcome::NotHandled`] when the engine has
//! nothing special to do; the connection then runs its generic path.
//! Genuine failures are always [`DbError`](crate::DbError)s, never a
//! declined outcome.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use polysql_core::{
    DiffOp, FieldSpec, IndexNaming, QuoteStyle, Resolver, Row, SchemaChange, SchemaSnapshot,
    TableSpec, Value,
};
use regex::Regex;

use crate::client::ExecOutcome;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{DriverError, ErrorKind, Result};
use crate::registry::Engine;

pub mod ddl;
pub mod mysql;
pub mod oracle;
pub mod sqlite;

pub use mysql::MysqlExtension;
pub use oracle::OracleExtension;
pub use sqlite::SqliteExtension;

/// Result of a declinable extension operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    /// The extension performed the operation.
    Handled(T),
    /// The extension declined; the generic path runs instead.
    NotHandled,
}

impl<T> Outcome<T> {
    pub fn is_handled(&self) -> bool {
        matches!(self, Outcome::Handled(_))
    }
}

/// How a schema change applied by an extension relates to the target
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The database now matches the target snapshot.
    Synced,
    /// The extension changed things the snapshot does not model; the cached
    /// snapshot must be discarded.
    OutOfBand,
}

/// What to do when releasing a savepoint fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFailure {
    /// The engine already committed (e.g. after DDL): drop every layer and
    /// commit whatever is still open.
    CollapseAll,
    /// Report the error.
    Raise,
}

/// Engine form of a condition operator.
///
/// # Examples
///
/// ```
/// use polysql_db::OperatorMapping;
///
/// let like = OperatorMapping::new("LIKE").with_postfix(" ESCAPE '\\'");
/// assert_eq!(like.render("name", ":name"), "name LIKE :name ESCAPE '\\'");
///
/// let ilike = OperatorMapping::new("LIKE").with_wrap("UPPER");
/// assert_eq!(ilike.render("name", ":name"), "UPPER(name) LIKE UPPER(:name)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorMapping {
    pub operator: String,
    /// Appended after the right-hand operand.
    pub postfix: Option<String>,
    /// Function applied to both operands.
    pub wrap: Option<String>,
}

impl OperatorMapping {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            postfix: None,
            wrap: None,
        }
    }

    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = Some(postfix.into());
        self
    }

    pub fn with_wrap(mut self, function: impl Into<String>) -> Self {
        self.wrap = Some(function.into());
        self
    }

    /// Renders `lhs <operator> rhs` in engine form.
    pub fn render(&self, lhs: &str, rhs: &str) -> String {
        let (lhs, rhs) = match &self.wrap {
            Some(f) => (format!("{f}({lhs})"), format!("{f}({rhs})")),
            None => (lhs.to_string(), rhs.to_string()),
        };
        format!(
            "{lhs} {} {rhs}{}",
            self.operator,
            self.postfix.as_deref().unwrap_or("")
        )
    }
}

/// Session lifecycle, versions, and identifier rules.
pub trait ConnectionHooks {
    fn engine(&self) -> Engine;

    /// Adjusts connection parameters before the client connects.
    fn pre_connection_open(&self, _config: &mut ConnectionConfig) {}

    /// Runs once the session is open and the init commands have run.
    fn post_connection_open(&self, _conn: &mut Connection) -> Result<()> {
        Ok(())
    }

    /// Version of the database server.
    fn server_version(&self, conn: &mut Connection) -> Result<String>;

    /// Platform name. With `strict`, sub-families sharing a wire protocol
    /// are told apart (e.g. `mariadb` instead of `mysql`).
    fn server_platform(&self, _conn: &mut Connection, _strict: bool) -> Result<String> {
        Ok(self.engine().platform().to_string())
    }

    /// Maximum identifier length, if the engine has one.
    fn identifier_limit(&self) -> Option<usize> {
        None
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::DoubleQuote
    }

    fn index_naming(&self) -> IndexNaming {
        IndexNaming::Global
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Statement preparation, results, and error classification.
pub trait StatementHooks {
    /// If `false`, `:name` placeholders are rewritten to positional `?`.
    fn named_placeholder_support(&self) -> bool {
        true
    }

    /// If `true`, a backslash inside a string literal escapes the next
    /// character.
    fn backslash_escapes(&self) -> bool {
        false
    }

    /// Engine form of a condition operator, or `None` to use it unchanged.
    fn map_condition_operator(&self, _operator: &str) -> Option<OperatorMapping> {
        None
    }

    /// Rows affected by a write.
    fn row_count(&self, outcome: &ExecOutcome) -> u64 {
        outcome.rows_affected
    }

    /// Post-processes one fetched row. The default maps shortened column
    /// names back to their logical form.
    fn process_fetched_row(&self, names: &Resolver, row: Row) -> Row {
        if names.identifiers().is_empty() {
            return row;
        }
        let (columns, values) = row.into_parts();
        let columns: Vec<String> = columns.iter().map(|c| names.logical_field(c)).collect();
        Row::new(columns, values)
    }

    /// Wraps `sql` to return `count` rows starting at row `from`.
    fn range_sql(&self, sql: &str, from: u64, count: u64) -> String {
        format!("{sql} LIMIT {count} OFFSET {from}")
    }

    /// Creates temporary table `table` from the result of `query`.
    fn temporary_table_sql(&self, table: &str, query: &str) -> String {
        format!("CREATE TEMPORARY TABLE {table} AS {query}")
    }

    /// Clause appended to a SELECT to lock the selected rows.
    fn for_update_clause(&self) -> &'static str {
        " FOR UPDATE"
    }

    /// Classifies a raw driver error.
    fn translate_error(&self, error: &DriverError) -> ErrorKind;

    fn native_upsert_support(&self) -> bool {
        false
    }

    /// Single-statement insert-or-update. `table`, `key` and `fields` are
    /// quoted physical names; values bind to `:p0`, `:p1`, ... in field
    /// order.
    fn upsert_sql(&self, _table: &str, _key: &str, _fields: &[String]) -> Option<String> {
        None
    }

    /// Id generated by the last insert into `table`, for engines that do
    /// not report it with the statement.
    fn last_insert_id(
        &self,
        _conn: &mut Connection,
        _table: Option<&str>,
        _field: Option<&str>,
    ) -> Result<Outcome<i64>> {
        Ok(Outcome::NotHandled)
    }
}

/// Transaction statements and DDL-in-transaction semantics.
pub trait TransactionHooks {
    /// Whether DDL can run inside a transaction without committing it.
    fn transactional_ddl_support(&self) -> bool {
        true
    }

    fn begin_sql(&self) -> &'static str {
        "BEGIN"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    /// `None` when the engine has no savepoint release statement.
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {name}"))
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }

    /// Decides what a failed savepoint release or rollback means.
    fn classify_release_failure(&self, _error: &DriverError) -> ReleaseFailure {
        ReleaseFailure::Raise
    }
}

/// Type mapping, DDL generation, introspection, and schema delegation.
pub trait SchemaHooks {
    /// Engine column type for `field`, without nullability or default.
    fn column_type_sql(&self, field: &FieldSpec) -> String;

    /// Full column definition.
    fn column_sql(&self, names: &mut Resolver, field: &FieldSpec) -> String {
        ddl::column_definition(self, names, field)
    }

    /// Statements creating `spec`, including its keys and indexes.
    fn create_table_sql(&self, names: &mut Resolver, spec: &TableSpec) -> Vec<String> {
        ddl::create_table(self, names, spec)
    }

    /// Canonical form of a target table, as introspection would report it.
    fn normalize_table(&self, spec: TableSpec) -> TableSpec {
        spec
    }

    /// Applies `change` in an engine-specific way. `from` is the current
    /// snapshot and `to` the target.
    fn apply_change(
        &self,
        _conn: &mut Connection,
        _from: &SchemaSnapshot,
        _to: &SchemaSnapshot,
        _change: &SchemaChange,
    ) -> Result<Outcome<Applied>> {
        Ok(Outcome::NotHandled)
    }

    /// Engine-specific statements for one diff operation.
    fn diff_sql(
        &self,
        _names: &mut Resolver,
        _op: &DiffOp,
        _from: &SchemaSnapshot,
        _to: &SchemaSnapshot,
    ) -> Result<Outcome<Vec<String>>> {
        Ok(Outcome::NotHandled)
    }

    /// Physical names of every table in the current schema.
    fn list_tables(&self, conn: &mut Connection) -> Result<Vec<String>>;

    /// Reads the structure of one table from the catalog.
    fn introspect_table(
        &self,
        conn: &mut Connection,
        physical: &str,
        logical: &str,
    ) -> Result<TableSpec>;

    /// Cheap existence probe for a quoted table name, or `None` to consult
    /// the catalog instead.
    fn probe_sql(&self, table: &str) -> Option<String> {
        Some(format!("SELECT 1 FROM {table} LIMIT 1"))
    }

    /// Next value of the connection-wide id sequence.
    fn next_sequence_value(&self, _conn: &mut Connection, _watermark: i64) -> Result<Outcome<i64>> {
        Ok(Outcome::NotHandled)
    }
}

/// The full extension contract.
pub trait Extension:
    ConnectionHooks + StatementHooks + TransactionHooks + SchemaHooks + Send + Sync
{
    fn debug(&self) -> bool;

    fn set_debug(&self, enabled: bool);
}

/// Debug switch shared by the bundled extensions, the only state they
/// mutate after construction.
#[derive(Debug, Default)]
pub struct DebugFlag(AtomicBool);

impl DebugFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// Text of column `name` in a catalog row; empty for NULL or missing.
pub(crate) fn column_text(row: &Row, name: &str) -> String {
    match row.get(name) {
        Some(Value::Text(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(Value::Blob(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
        Some(value) => value.to_string(),
    }
}

/// Integer value of column `name` in a catalog row.
pub(crate) fn column_int(row: &Row, name: &str) -> Option<i64> {
    row.get(name).and_then(|v| v.as_i64())
}

/// A catalog column type such as `VARCHAR(64)` or `NUMBER(10, 2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeclaredType {
    /// Upper-cased base name.
    pub name: String,
    pub length: Option<u32>,
    pub scale: Option<u32>,
    /// Everything after the closing parenthesis, upper-cased.
    pub rest: String,
}

pub(crate) fn parse_declared_type(declared: &str) -> DeclaredType {
    static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?(?:[A-Za-z]+\s*)?\))?\s*(.*)$")
            .expect("static regex must compile")
    });
    match TYPE_RE.captures(declared) {
        Some(caps) => DeclaredType {
            name: caps[1].to_ascii_uppercase(),
            length: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            scale: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            rest: caps.get(4).map_or(String::new(), |m| m.as_str().to_ascii_uppercase()),
        },
        None => DeclaredType {
            name: declared.trim().to_ascii_uppercase(),
            length: None,
            scale: None,
            rest: String::new(),
        },
    }
}
