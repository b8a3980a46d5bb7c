//! Statement pipeline: placeholder handling and fetched results.
//!
//! [`PreparedQuery`] is the parsed form of one query text, cached by the
//! connection per unique text. Engines without named placeholder support
//! get the text rewritten to positional `?` markers, with the argument
//! order recorded. [`QueryResult`] holds the materialized rows of one
//! execution and hands them out according to a [`FetchMode`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use polysql_core::{Row, Value};

use crate::args::Args;
use crate::client::Params;
use crate::error::{DbError, Result};

/// A parsed query text.
///
/// # Examples
///
/// ```
/// use polysql_db::{Args, Params, PreparedQuery};
///
/// let q = PreparedQuery::parse("SELECT * FROM t WHERE a = :a AND b = ':no' AND c = :a", false, false);
/// assert_eq!(q.sql(), "SELECT * FROM t WHERE a = ? AND b = ':no' AND c = ?");
/// assert_eq!(q.placeholders(), &[":a".to_string(), ":a".to_string()]);
///
/// let params = q.bind(&Args::new().bind("a", 1)).unwrap();
/// assert!(matches!(params, Params::Positional(v) if v.len() == 2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    sql: String,
    placeholders: Vec<String>,
    named: bool,
}

impl PreparedQuery {
    /// Parses `sql`, locating `:name` placeholders outside string literals
    /// and quoted identifiers.
    ///
    /// With `named == false` every placeholder is replaced by `?` and
    /// recorded once per occurrence; otherwise the text is kept and each
    /// distinct name is recorded once. A backslash inside a single-quoted
    /// literal escapes the next character only when `backslash_escapes`
    /// is set; otherwise it is an ordinary character, as in standard SQL.
    pub fn parse(sql: &str, named: bool, backslash_escapes: bool) -> Self {
        let mut out = String::with_capacity(sql.len());
        let mut placeholders: Vec<String> = Vec::new();
        let chars: Vec<char> = sql.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' | '`' => {
                    out.push(c);
                    i += 1;
                    while i < chars.len() {
                        out.push(chars[i]);
                        if chars[i] == c {
                            if chars.get(i + 1) == Some(&c) {
                                out.push(c);
                                i += 2;
                                continue;
                            }
                            break;
                        }
                        if backslash_escapes && chars[i] == '\\' && c == '\'' {
                            if let Some(next) = chars.get(i + 1) {
                                out.push(*next);
                                i += 1;
                            }
                        }
                        i += 1;
                    }
                    i += 1;
                }
                ':' if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_')
                    && (i == 0 || chars[i - 1] != ':') =>
                {
                    let start = i;
                    i += 1;
                    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    let name: String = chars[start..i].iter().collect();
                    if named {
                        out.push_str(&name);
                        if !placeholders.contains(&name) {
                            placeholders.push(name);
                        }
                    } else {
                        out.push('?');
                        placeholders.push(name);
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Self {
            sql: out,
            placeholders,
            named,
        }
    }

    /// A query sent verbatim, without placeholders.
    pub(crate) fn raw(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            placeholders: Vec::new(),
            named: true,
        }
    }

    /// The text sent to the client.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Placeholder names, with their leading colon.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Binds `args` in the order the client expects.
    ///
    /// # Errors
    ///
    /// Returns [`MissingArgument`](DbError::MissingArgument) when a
    /// placeholder has no value. Arguments without a placeholder are
    /// ignored.
    pub fn bind(&self, args: &Args) -> Result<Params> {
        if self.placeholders.is_empty() {
            return Ok(Params::None);
        }
        let mut values = Vec::with_capacity(self.placeholders.len());
        for name in &self.placeholders {
            let value = args
                .get(name)
                .ok_or_else(|| DbError::MissingArgument(name.clone()))?;
            values.push((name.clone(), value.clone()));
        }
        if self.named {
            Ok(Params::Named(values))
        } else {
            Ok(Params::Positional(values.into_iter().map(|(_, v)| v).collect()))
        }
    }
}

/// How [`QueryResult::fetch_next`] shapes each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Column name to value.
    #[default]
    Record,
    /// Values by position.
    List,
    /// A single column by position.
    Column(usize),
}

/// One row shaped by a [`FetchMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Record(Row),
    List(Vec<Value>),
    Column(Value),
}

/// The rows and counters of one executed statement.
///
/// Rows are prefetched into a buffer and consumed from the front.
///
/// # Examples
///
/// ```
/// use polysql_core::{Row, Value};
/// use polysql_db::{FetchMode, Fetched, QueryResult};
///
/// let columns = vec!["id".to_string(), "name".to_string()];
/// let rows = vec![
///     Row::new(columns.clone(), vec![1.into(), "a".into()]),
///     Row::new(columns, vec![2.into(), "b".into()]),
/// ];
/// let mut result = QueryResult::from_rows(rows);
/// result.set_fetch_mode(FetchMode::Column(1));
/// assert_eq!(result.fetch_next(), Some(Fetched::Column(Value::from("a"))));
/// assert_eq!(result.fetch_col(0), vec![Value::Integer(2)]);
/// assert!(result.fetch().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    columns: Arc<[String]>,
    rows: VecDeque<Row>,
    row_count: u64,
    last_insert_id: Option<i64>,
    mode: FetchMode,
}

impl QueryResult {
    /// A result holding fetched rows; the row count is the number of rows.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(Row::shared_columns)
            .unwrap_or_else(|| Arc::from(Vec::<String>::new()));
        Self::with_columns(columns, rows)
    }

    pub(crate) fn with_columns(columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            row_count: rows.len() as u64,
            rows: rows.into(),
            last_insert_id: None,
            mode: FetchMode::Record,
        }
    }

    /// A result of a statement that returned no rows.
    pub fn from_count(row_count: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            row_count,
            last_insert_id,
            ..Self::default()
        }
    }

    pub fn set_fetch_mode(&mut self, mode: FetchMode) {
        self.mode = mode;
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows affected by a write, or rows returned by a query.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Next row, shaped by the current fetch mode.
    pub fn fetch_next(&mut self) -> Option<Fetched> {
        let row = self.rows.pop_front()?;
        Some(match self.mode {
            FetchMode::Record => Fetched::Record(row),
            FetchMode::List => Fetched::List(row.into_values()),
            FetchMode::Column(i) => {
                Fetched::Column(row.get_index(i).cloned().unwrap_or(Value::Null))
            }
        })
    }

    /// Next row as a record.
    pub fn fetch(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Column `index` of the next row.
    pub fn fetch_field(&mut self, index: usize) -> Option<Value> {
        self.rows
            .pop_front()
            .map(|row| row.get_index(index).cloned().unwrap_or(Value::Null))
    }

    /// Column `index` of every remaining row.
    pub fn fetch_col(&mut self, index: usize) -> Vec<Value> {
        self.rows
            .drain(..)
            .map(|row| row.get_index(index).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Every remaining row.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }

    /// Remaining rows as a map from the first column (as text) to the
    /// second.
    pub fn fetch_all_keyed(&mut self) -> BTreeMap<String, Value> {
        self.rows
            .drain(..)
            .filter_map(|row| {
                let key = row.get_index(0)?.clone().stringify();
                let key = key.as_str().map(str::to_string)?;
                Some((key, row.get_index(1).cloned().unwrap_or(Value::Null)))
            })
            .collect()
    }

    /// Remaining rows keyed by the text value of column `key`.
    pub fn fetch_all_assoc(&mut self, key: &str) -> BTreeMap<String, Row> {
        self.rows
            .drain(..)
            .filter_map(|row| {
                let k = row.get(key)?.clone().stringify();
                let k = k.as_str().map(str::to_string)?;
                Some((k, row))
            })
            .collect()
    }

    /// Number of rows still buffered.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for QueryResult {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.fetch()
    }
}
