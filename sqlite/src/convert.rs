//! Conversion between [`Value`] and SQLite storage classes.
//!
//! SQLite stores five storage classes which map one to one onto [`Value`].
//! Text that is not valid UTF-8 is converted lossily; the engine does not
//! enforce an encoding on bound text.

use polysql_core::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Converts a bound argument into an owned SQLite value.
pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

/// Converts one fetched column.
pub(crate) fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Whether `sql` inserts rows, so that the generated rowid is meaningful.
pub(crate) fn is_insert(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("");
    keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
}
