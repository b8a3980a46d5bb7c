//! Database connections.
//!
//! A [`Connection`] owns one client session, the engine extension chosen
//! for it, the identifier resolver, the transaction stack, the prepared
//! statement cache, and the cached schema snapshot. Every statement passes
//! through [`Connection::query`]: `{table}` markers are prefixed, named
//! placeholders are rewritten when the engine needs it, driver errors are
//! classified by the extension, and lock conflicts on writes are retried.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use polysql_core::identifier::{escape_alias, escape_like, escape_name};
use polysql_core::{Resolver, Row, SchemaSnapshot};
use tracing::{debug, info, warn};

use crate::args::Args;
use crate::client::{Client, ExecOutcome, Params, ResultSet};
use crate::config::ConnectionConfig;
use crate::error::{DbError, DriverError, ErrorKind, QueryContext, Result};
use crate::extension::{Extension, OperatorMapping, Outcome};
use crate::registry::{self, Engine};
use crate::statement::{PreparedQuery, QueryResult};
use crate::transaction::TransactionStack;

/// How a statement is executed and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatementKind {
    /// Returns rows.
    Read,
    /// INSERT, UPDATE, DELETE and friends; retried on lock conflicts.
    Write,
    /// Structural change; invalidates the schema snapshot.
    Ddl,
    Other,
}

impl StatementKind {
    pub(crate) fn of(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "WITH" | "PRAGMA" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "VALUES" => {
                StatementKind::Read
            }
            "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "MERGE" => StatementKind::Write,
            "CREATE" | "ALTER" | "DROP" | "RENAME" | "TRUNCATE" | "COMMENT" => StatementKind::Ddl,
            _ => StatementKind::Other,
        }
    }
}

enum Executed {
    Rows(ResultSet),
    Count(ExecOutcome),
}

/// One logical database session.
///
/// # Examples
///
/// ```no_run
/// use polysql_db::{Args, Connection, ConnectionConfig};
/// # fn client() -> Box<dyn polysql_db::Client> { unimplemented!() }
///
/// let config = ConnectionConfig::new("sqlite", "site.db").with_prefix("app_");
/// let mut conn = Connection::from_client(config, client())?;
///
/// let mut result = conn.query(
///     "SELECT name FROM {users} WHERE uid = :uid",
///     Args::new().bind("uid", 1),
/// )?;
/// if let Some(row) = result.fetch() {
///     println!("{:?}", row.get("name"));
/// }
/// # Ok::<(), polysql_db::DbError>(())
/// ```
pub struct Connection {
    pub(crate) client: Box<dyn Client>,
    pub(crate) extension: Arc<dyn Extension>,
    pub(crate) config: ConnectionConfig,
    pub(crate) names: Resolver,
    pub(crate) transactions: TransactionStack,
    pub(crate) snapshot: Option<SchemaSnapshot>,
    statements: HashMap<String, Arc<PreparedQuery>>,
    temporary_tables: u32,
    last_insert_id: Option<i64>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.extension.engine())
            .field("database", &self.config.database)
            .field("prefix", &self.names.prefix())
            .field("transactions", &self.transactions.names())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Resolves the extension for `config.driver`, lets it adjust the
    /// configuration, then connects with `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEngine`](DbError::UnknownEngine) for unknown
    /// drivers, [`Config`](DbError::Config) for invalid settings and
    /// [`ConnectionFailure`](DbError::ConnectionFailure) when `connect`
    /// fails.
    pub fn open<F>(config: ConnectionConfig, connect: F) -> Result<Self>
    where
        F: FnOnce(&ConnectionConfig) -> std::result::Result<Box<dyn Client>, DriverError>,
    {
        let extension = registry::extension(&config.driver)?;
        Self::open_with_extension(config, extension, connect)
    }

    /// Like [`open`](Connection::open) with an explicit extension.
    pub fn open_with_extension<F>(
        mut config: ConnectionConfig,
        extension: Arc<dyn Extension>,
        connect: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ConnectionConfig) -> std::result::Result<Box<dyn Client>, DriverError>,
    {
        config.validate()?;
        extension.pre_connection_open(&mut config);
        let client = connect(&config).map_err(DbError::connection)?;
        Self::finish(config, client, extension)
    }

    /// Wraps an already connected client.
    pub fn from_client(config: ConnectionConfig, client: Box<dyn Client>) -> Result<Self> {
        let extension = registry::extension(&config.driver)?;
        Self::with_extension(config, client, extension)
    }

    /// Wraps an already connected client with an explicit extension.
    pub fn with_extension(
        mut config: ConnectionConfig,
        client: Box<dyn Client>,
        extension: Arc<dyn Extension>,
    ) -> Result<Self> {
        config.validate()?;
        extension.pre_connection_open(&mut config);
        Self::finish(config, client, extension)
    }

    fn finish(
        config: ConnectionConfig,
        client: Box<dyn Client>,
        extension: Arc<dyn Extension>,
    ) -> Result<Self> {
        extension.set_debug(config.debug);
        let names = Resolver::new(config.prefix.clone(), extension.quote_style())
            .with_limit(extension.identifier_limit())
            .with_index_naming(extension.index_naming())
            .with_reserved_words(extension.reserved_words());
        let init_commands = config.init_commands.clone();
        let mut conn = Self {
            client,
            extension: Arc::clone(&extension),
            config,
            names,
            transactions: TransactionStack::default(),
            snapshot: None,
            statements: HashMap::new(),
            temporary_tables: 0,
            last_insert_id: None,
        };
        for sql in &init_commands {
            conn.execute_raw(sql)?;
        }
        extension.post_connection_open(&mut conn)?;
        info!(
            engine = %extension.engine(),
            prefix = conn.names.prefix(),
            "connection open"
        );
        Ok(conn)
    }

    pub fn engine(&self) -> Engine {
        self.extension.engine()
    }

    pub fn extension(&self) -> &Arc<dyn Extension> {
        &self.extension
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        self.names.prefix()
    }

    pub fn names(&self) -> &Resolver {
        &self.names
    }

    pub fn names_mut(&mut self) -> &mut Resolver {
        &mut self.names
    }

    pub fn client(&self) -> &dyn Client {
        self.client.as_ref()
    }

    /// Toggles statement logging at info level.
    pub fn set_debug(&mut self, enabled: bool) {
        self.config.debug = enabled;
        self.extension.set_debug(enabled);
    }

    pub fn client_version(&self) -> String {
        self.client.client_version()
    }

    pub fn server_version(&mut self) -> Result<String> {
        let ext = Arc::clone(&self.extension);
        ext.server_version(self)
    }

    pub fn server_platform(&mut self, strict: bool) -> Result<String> {
        let ext = Arc::clone(&self.extension);
        ext.server_platform(self, strict)
    }

    /// Runs a query.
    ///
    /// `{table}` markers in `sql` are replaced by physical table names and
    /// `:name` placeholders are bound from `args`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingArgument`](DbError::MissingArgument) for unbound
    /// placeholders and the classified [`DbError`] for driver failures.
    pub fn query(&mut self, sql: &str, args: impl Into<Args>) -> Result<QueryResult> {
        let args = args.into();
        let sql = self.names.prefix_tables(sql);
        let prepared = self.prepare(&sql)?;
        let params = prepared.bind(&args)?;
        self.run(&prepared, &params, &args)
    }

    /// Runs a statement and returns the affected row count.
    pub fn execute(&mut self, sql: &str, args: impl Into<Args>) -> Result<u64> {
        Ok(self.query(sql, args)?.row_count())
    }

    /// Runs a query returning at most `count` rows starting at row `from`.
    pub fn query_range(
        &mut self,
        sql: &str,
        args: impl Into<Args>,
        from: u64,
        count: u64,
    ) -> Result<QueryResult> {
        let sql = self.extension.range_sql(sql, from, count);
        self.query(&sql, args)
    }

    /// Stores the result of `sql` in a new temporary table and returns the
    /// table name.
    pub fn query_temporary(&mut self, sql: &str, args: impl Into<Args>) -> Result<String> {
        let name = format!("db_temporary_{}", self.temporary_tables);
        self.temporary_tables += 1;
        let sql = self
            .extension
            .temporary_table_sql(&self.names.quote(&name), sql);
        self.query(&sql, args)?;
        Ok(name)
    }

    /// Id generated by the last insert.
    ///
    /// Engines that generate ids with sequences need the logical `table`
    /// (and optionally the serial `field`) to find the sequence.
    pub fn last_insert_id(&mut self, table: Option<&str>, field: Option<&str>) -> Result<Option<i64>> {
        let ext = Arc::clone(&self.extension);
        match ext.last_insert_id(self, table, field)? {
            Outcome::Handled(id) => Ok(Some(id)),
            Outcome::NotHandled => Ok(self.last_insert_id),
        }
    }

    /// Replaces `{table}` markers with quoted physical table names.
    pub fn prefix_tables(&mut self, sql: &str) -> String {
        self.names.prefix_tables(sql)
    }

    /// Strips unsafe characters from a table name.
    pub fn escape_table(&self, table: &str) -> String {
        escape_name(table)
    }

    /// Strips unsafe characters from a field name and quotes it if needed.
    pub fn escape_field(&self, field: &str) -> String {
        self.names.quote(&escape_name(field))
    }

    pub fn escape_alias(&self, alias: &str) -> String {
        escape_alias(alias)
    }

    pub fn escape_like(&self, value: &str) -> String {
        escape_like(value)
    }

    /// Engine form of a condition operator.
    pub fn condition_operator(&self, operator: &str) -> OperatorMapping {
        self.extension
            .map_condition_operator(operator)
            .unwrap_or_else(|| OperatorMapping::new(operator))
    }

    /// Logical names of the tables matching a LIKE `pattern`, sorted.
    pub fn find_tables(&mut self, pattern: &str) -> Result<Vec<String>> {
        let ext = Arc::clone(&self.extension);
        let mut tables: Vec<String> = ext
            .list_tables(self)?
            .iter()
            .filter_map(|physical| self.names.logical_table(physical))
            .filter(|logical| like_match(pattern, logical))
            .collect();
        tables.sort();
        Ok(tables)
    }

    /// The cached schema snapshot, introspected on first use.
    pub fn schema_snapshot(&mut self) -> Result<&SchemaSnapshot> {
        if self.snapshot.is_none() {
            let snapshot = self.introspect()?;
            self.snapshot = Some(snapshot);
        }
        Ok(self.snapshot.get_or_insert_with(SchemaSnapshot::new))
    }

    /// Drops the cached schema snapshot.
    pub fn invalidate_snapshot(&mut self) {
        if self.snapshot.take().is_some() {
            debug!("schema snapshot invalidated");
        }
    }

    /// Seeds the cached schema snapshot.
    #[doc(hidden)]
    pub fn set_schema_snapshot(&mut self, snapshot: SchemaSnapshot) {
        self.snapshot = Some(snapshot);
    }

    fn introspect(&mut self) -> Result<SchemaSnapshot> {
        let ext = Arc::clone(&self.extension);
        let mut snapshot = SchemaSnapshot::new();
        for physical in ext.list_tables(self)? {
            let Some(logical) = self.names.logical_table(&physical) else {
                continue;
            };
            let table = ext.introspect_table(self, &physical, &logical)?;
            snapshot.insert(table);
        }
        debug!(tables = snapshot.len(), "schema introspected");
        Ok(snapshot)
    }

    /// Runs `sql` as is: no table prefixing and no placeholder handling.
    pub(crate) fn execute_raw(&mut self, sql: &str) -> Result<u64> {
        let prepared = PreparedQuery::raw(sql);
        Ok(self.run(&prepared, &Params::None, &Args::new())?.row_count())
    }

    /// Runs a catalog query with named arguments and no table prefixing.
    pub(crate) fn query_catalog(&mut self, sql: &str, args: impl Into<Args>) -> Result<Vec<Row>> {
        let args = args.into();
        let prepared = self.prepare(sql)?;
        let params = prepared.bind(&args)?;
        Ok(self.run(&prepared, &params, &args)?.fetch_all())
    }

    /// Runs a statement over physical names with named arguments.
    pub(crate) fn execute_unprefixed(&mut self, sql: &str, args: &Args) -> Result<u64> {
        let prepared = self.prepare(sql)?;
        let params = prepared.bind(args)?;
        Ok(self.run(&prepared, &params, args)?.row_count())
    }

    fn prepare(&mut self, sql: &str) -> Result<Arc<PreparedQuery>> {
        if let Some(prepared) = self.statements.get(sql) {
            return Ok(Arc::clone(prepared));
        }
        let prepared = Arc::new(PreparedQuery::parse(
            sql,
            self.extension.named_placeholder_support(),
            self.extension.backslash_escapes(),
        ));
        if let Err(err) = self.client.prepare(prepared.sql()) {
            let kind = self.extension.translate_error(&err);
            return Err(DbError::from_driver(
                kind,
                err,
                QueryContext::new(prepared.sql()),
            ));
        }
        self.statements.insert(sql.to_string(), Arc::clone(&prepared));
        Ok(prepared)
    }

    fn run(&mut self, prepared: &PreparedQuery, params: &Params, args: &Args) -> Result<QueryResult> {
        let sql = prepared.sql();
        let kind = StatementKind::of(sql);
        let retry = self.config.retry.clone();
        let mut attempt = 0u32;
        let mut reprepared = false;
        loop {
            attempt += 1;
            if self.extension.debug() {
                info!(sql, attempt, "executing statement");
            } else {
                debug!(sql, attempt, "executing statement");
            }
            let executed = match kind {
                StatementKind::Read => self.client.query(sql, params).map(Executed::Rows),
                _ => self.client.execute(sql, params).map(Executed::Count),
            };
            let err = match executed {
                Ok(executed) => return Ok(self.complete(kind, executed)),
                Err(err) => err,
            };
            let class = self.extension.translate_error(&err);
            let retryable = kind == StatementKind::Write
                && attempt < retry.max_attempts
                && (class == ErrorKind::LockTimeout
                    || (class == ErrorKind::Deadlock && self.transactions.is_empty()));
            if retryable {
                warn!(sql, attempt, code = err.code, kind = ?class, "lock conflict, retrying");
                std::thread::sleep(retry.interval());
                continue;
            }
            if class == ErrorKind::SchemaChanged && !reprepared {
                warn!(sql, code = err.code, "schema changed during execution, re-running");
                reprepared = true;
                if self.client.prepare(sql).is_ok() {
                    continue;
                }
            }
            let context = QueryContext {
                query: sql.to_string(),
                args: args.to_vec(),
            };
            return Err(DbError::from_driver(class, err, context));
        }
    }

    fn complete(&mut self, kind: StatementKind, executed: Executed) -> QueryResult {
        match executed {
            Executed::Rows(rs) => {
                let columns: Arc<[String]> = rs.columns.into();
                let rows: Vec<Row> = rs
                    .rows
                    .into_iter()
                    .map(|values| {
                        let row = Row::new(Arc::clone(&columns), values);
                        self.extension.process_fetched_row(&self.names, row)
                    })
                    .collect();
                let columns = rows.first().map_or(columns, Row::shared_columns);
                QueryResult::with_columns(columns, rows)
            }
            Executed::Count(outcome) => {
                if kind == StatementKind::Ddl {
                    self.invalidate_snapshot();
                    self.transactions.mark_ddl();
                }
                if outcome.last_insert_id.is_some() {
                    self.last_insert_id = outcome.last_insert_id;
                }
                QueryResult::from_count(self.extension.row_count(&outcome), outcome.last_insert_id)
            }
        }
    }
}

/// SQL LIKE matching with `%`, `_` and backslash escapes.
pub(crate) fn like_match(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy)]
    enum Token {
        Any,
        One,
        Char(char),
    }
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            c => Token::Char(c),
        });
    }
    let text: Vec<char> = text.chars().collect();
    // matches[j]: tokens consumed so far match text[..j]
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= matches[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1];
                }
            }
            Token::Char(c) => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1] && text[j - 1] == c;
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}
