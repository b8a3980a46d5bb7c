//! Scalar values and result rows.
//!
//! [`Value`] is the single scalar representation exchanged between the
//! connection and the underlying client library, in both directions:
//! bound arguments and fetched columns. [`Row`] pairs a shared column list
//! with one row of values.

use std::fmt;
use std::sync::Arc;

/// A scalar SQL value.
///
/// # Examples
///
/// ```
/// use polysql_core::Value;
///
/// assert_eq!(Value::from(42).as_i64(), Some(42));
/// assert_eq!(Value::from("42").as_i64(), Some(42));
/// assert_eq!(Value::Null.as_i64(), None);
/// assert_eq!(Value::from(1.5).stringify(), Value::from("1.5"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value; text is parsed so stringified rows still
    /// yield numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts numeric scalars to their text form. NULL and blobs are kept.
    pub fn stringify(self) -> Value {
        match self {
            Value::Integer(v) => Value::Text(v.to_string()),
            Value::Float(v) => Value::Text(v.to_string()),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<&crate::DefaultValue> for Value {
    fn from(v: &crate::DefaultValue) -> Self {
        match v {
            crate::DefaultValue::Integer(i) => Value::Integer(*i),
            crate::DefaultValue::Float(x) => Value::Float(*x),
            crate::DefaultValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// One fetched row: a shared column list plus the row's values.
///
/// # Examples
///
/// ```
/// use polysql_core::{Row, Value};
///
/// let row = Row::new(vec!["id".to_string(), "name".to_string()], vec![1.into(), "a".into()]);
/// assert_eq!(row.get("name"), Some(&Value::from("a")));
/// assert_eq!(row.get_index(0), Some(&Value::Integer(1)));
/// assert!(row.get("missing").is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: impl Into<Arc<[String]>>, values: Vec<Value>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn shared_columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Splits the row into its column list and values.
    pub fn into_parts(self) -> (Arc<[String]>, Vec<Value>) {
        (self.columns, self.values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_keeps_null_and_blob() {
        assert_eq!(Value::Null.stringify(), Value::Null);
        assert_eq!(Value::Blob(vec![1]).stringify(), Value::Blob(vec![1]));
        assert_eq!(Value::Integer(-3).stringify(), Value::from("-3"));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Float(2.0).as_i64(), Some(2));
        assert_eq!(Value::Float(2.5).as_i64(), None);
        assert_eq!(Value::from(" 7 ").as_i64(), Some(7));
        assert_eq!(Value::from("x").as_i64(), None);
        assert_eq!(Value::from("2.5").as_f64(), Some(2.5));
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::from("a"));
    }

    #[test]
    fn test_row_iter_pairs() {
        let row = Row::new(vec!["a".to_string(), "b".to_string()], vec![1.into(), 2.into()]);
        let pairs: Vec<_> = row.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
        assert_eq!(
            pairs,
            vec![("a".to_string(), Value::Integer(1)), ("b".to_string(), Value::Integer(2))]
        );
        assert_eq!(row.len(), 2);
    }
}
