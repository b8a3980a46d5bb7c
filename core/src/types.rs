//! Table specification types.
//!
//! This module defines the engine-neutral description of a table that
//! callers hand to the schema API: fields with a semantic type and size
//! class, the primary key, unique keys, and plain indexes. The types are
//! designed for serialization with [`serde`] so specifications can live in
//! YAML or JSON files next to the code that uses them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic type of a field.
///
/// Each engine extension maps these to a physical column type; the mapping
/// also depends on the field's [`SizeClass`].
///
/// # Examples
///
/// ```
/// use polysql_core::FieldType;
///
/// assert!(FieldType::Varchar.is_string());
/// assert!(!FieldType::Int.is_string());
/// assert!(FieldType::Serial.is_integer());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Auto-incrementing integer, always part of the primary key.
    Serial,
    /// Integer.
    Int,
    /// Floating point number.
    Float,
    /// Fixed precision decimal.
    Numeric,
    /// Variable length string (`length` characters).
    Varchar,
    /// Variable length ASCII-only string.
    VarcharAscii,
    /// Fixed length string.
    Char,
    /// Unbounded text.
    Text,
    /// Binary data.
    Blob,
}

impl FieldType {
    /// Returns `true` for character types (varchar, char and text).
    pub fn is_string(self) -> bool {
        matches!(
            self,
            FieldType::Varchar | FieldType::VarcharAscii | FieldType::Char | FieldType::Text
        )
    }

    /// Returns `true` for integer types, including [`FieldType::Serial`].
    pub fn is_integer(self) -> bool {
        matches!(self, FieldType::Serial | FieldType::Int)
    }
}

/// Storage size hint for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Tiny,
    Small,
    Medium,
    #[default]
    Normal,
    Big,
}

impl SizeClass {
    fn is_normal(&self) -> bool {
        *self == SizeClass::Normal
    }
}

/// A literal default value for a field.
///
/// # Examples
///
/// ```
/// use polysql_core::DefaultValue;
///
/// assert_eq!(DefaultValue::from("it's").to_sql_literal(), "'it''s'");
/// assert_eq!(DefaultValue::from(0).to_sql_literal(), "0");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl DefaultValue {
    /// Renders the value as a SQL literal, doubling embedded single quotes.
    pub fn to_sql_literal(&self) -> String {
        match self {
            DefaultValue::Integer(v) => v.to_string(),
            DefaultValue::Float(v) => {
                let s = v.to_string();
                if s.contains(['.', 'e', 'E']) { s } else { format!("{s}.0") }
            }
            DefaultValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }

    /// Parses a SQL literal as reported by an engine's catalog.
    ///
    /// Quoted strings become [`DefaultValue::Text`], numbers become
    /// numeric variants, and `NULL` yields `None`. Anything else (function
    /// calls, expressions) is kept verbatim as text.
    pub fn from_sql_literal(literal: &str) -> Option<Self> {
        let trimmed = literal.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return None;
        }
        let unwrapped = trimmed
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(trimmed);
        if let Some(inner) = unwrapped
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
        {
            return Some(DefaultValue::Text(inner.replace("''", "'")));
        }
        if let Ok(v) = unwrapped.parse::<i64>() {
            return Some(DefaultValue::Integer(v));
        }
        if let Ok(v) = unwrapped.parse::<f64>() {
            return Some(DefaultValue::Float(v));
        }
        Some(DefaultValue::Text(unwrapped.to_string()))
    }
}

impl From<i64> for DefaultValue {
    fn from(v: i64) -> Self {
        DefaultValue::Integer(v)
    }
}

impl From<i32> for DefaultValue {
    fn from(v: i32) -> Self {
        DefaultValue::Integer(i64::from(v))
    }
}

impl From<f64> for DefaultValue {
    fn from(v: f64) -> Self {
        DefaultValue::Float(v)
    }
}

impl From<&str> for DefaultValue {
    fn from(v: &str) -> Self {
        DefaultValue::Text(v.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(v: String) -> Self {
        DefaultValue::Text(v)
    }
}

/// Specification of a single field (column).
///
/// Use the typed constructors ([`serial`](FieldSpec::serial),
/// [`int`](FieldSpec::int), [`varchar`](FieldSpec::varchar), ...) and chain
/// builder methods such as [`not_null`](FieldSpec::not_null) and
/// [`default`](FieldSpec::default).
///
/// # Examples
///
/// ```
/// use polysql_core::{DefaultValue, FieldSpec, FieldType};
///
/// let name = FieldSpec::varchar("name", 64).not_null().default("");
/// assert_eq!(name.field_type, FieldType::Varchar);
/// assert_eq!(name.length, Some(64));
/// assert!(name.not_null);
/// assert_eq!(name.default, Some(DefaultValue::Text(String::new())));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Logical field name.
    pub name: String,
    /// Semantic type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Storage size hint.
    #[serde(default, skip_serializing_if = "SizeClass::is_normal")]
    pub size: SizeClass,
    /// Maximum length for character types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Total digits for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Digits after the decimal point for numeric fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    /// Whether the column rejects NULL.
    #[serde(default)]
    pub not_null: bool,
    /// Literal default applied by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Unsigned numeric (only meaningful on engines that support it).
    #[serde(default)]
    pub unsigned: bool,
    /// Column comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    /// Creates a field with the given type and no other attributes.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            size: SizeClass::Normal,
            length: None,
            precision: None,
            scale: None,
            not_null: false,
            default: None,
            unsigned: false,
            description: None,
        }
    }

    /// Auto-incrementing, non-null integer.
    pub fn serial(name: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldType::Serial);
        field.not_null = true;
        field.unsigned = true;
        field
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn numeric(name: impl Into<String>, precision: u32, scale: u32) -> Self {
        let mut field = Self::new(name, FieldType::Numeric);
        field.precision = Some(precision);
        field.scale = Some(scale);
        field
    }

    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        let mut field = Self::new(name, FieldType::Varchar);
        field.length = Some(length);
        field
    }

    pub fn varchar_ascii(name: impl Into<String>, length: u32) -> Self {
        let mut field = Self::new(name, FieldType::VarcharAscii);
        field.length = Some(length);
        field
    }

    pub fn char(name: impl Into<String>, length: u32) -> Self {
        let mut field = Self::new(name, FieldType::Char);
        field.length = Some(length);
        field
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Blob)
    }

    /// Marks the field as `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the default value.
    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn size(mut self, size: SizeClass) -> Self {
        self.size = size;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns a copy of this field under a different name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut field = self.clone();
        field.name = name.into();
        field
    }

    /// Whether the field needs an explicit initial value to be added to a
    /// table that already holds rows.
    pub fn requires_initial_value(&self) -> bool {
        self.not_null && self.default.is_none() && self.field_type != FieldType::Serial
    }
}

/// A column reference inside a key or index, with an optional key length.
///
/// In YAML/JSON a column is either a bare name (`name`) or a
/// `[name, length]` pair for prefix indexes.
///
/// # Examples
///
/// ```
/// use polysql_core::IndexColumn;
///
/// let col: IndexColumn = "title".into();
/// assert_eq!(col.name, "title");
/// assert_eq!(col.length, None);
///
/// let prefixed = IndexColumn::prefixed("body", 191);
/// assert_eq!(prefixed.to_string(), "body(191)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "IndexColumnRepr", into = "IndexColumnRepr")]
pub struct IndexColumn {
    pub name: String,
    pub length: Option<u32>,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
        }
    }

    pub fn prefixed(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length: Some(length),
        }
    }
}

impl fmt::Display for IndexColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.length {
            Some(length) => write!(f, "{}({length})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for IndexColumn {
    fn from(name: &str) -> Self {
        IndexColumn::new(name)
    }
}

impl From<String> for IndexColumn {
    fn from(name: String) -> Self {
        IndexColumn::new(name)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IndexColumnRepr {
    Name(String),
    Prefixed(String, u32),
}

impl From<IndexColumnRepr> for IndexColumn {
    fn from(repr: IndexColumnRepr) -> Self {
        match repr {
            IndexColumnRepr::Name(name) => IndexColumn::new(name),
            IndexColumnRepr::Prefixed(name, length) => IndexColumn::prefixed(name, length),
        }
    }
}

impl From<IndexColumn> for IndexColumnRepr {
    fn from(col: IndexColumn) -> Self {
        match col.length {
            Some(length) => IndexColumnRepr::Prefixed(col.name, length),
            None => IndexColumnRepr::Name(col.name),
        }
    }
}

/// Builds an owned column list from anything convertible to [`IndexColumn`].
pub fn columns<I, C>(cols: I) -> Vec<IndexColumn>
where
    I: IntoIterator<Item = C>,
    C: Into<IndexColumn>,
{
    cols.into_iter().map(Into::into).collect()
}

/// Logical description of a table.
///
/// Supplied by the caller and never mutated by the connection; schema
/// snapshots hold their own copies.
///
/// # Examples
///
/// ```
/// use polysql_core::{FieldSpec, TableSpec};
///
/// let spec = TableSpec::new("users")
///     .with_field(FieldSpec::serial("uid"))
///     .with_field(FieldSpec::varchar("name", 60).not_null().default(""))
///     .with_field(FieldSpec::varchar("mail", 254))
///     .with_primary_key(["uid"])
///     .with_unique_key("name", ["name"])
///     .with_index("mail", ["mail"]);
///
/// assert_eq!(spec.fields.len(), 3);
/// assert!(spec.field("mail").is_some());
/// assert_eq!(spec.serial_field().map(|f| f.name.as_str()), Some("uid"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Logical (unprefixed) table name.
    pub name: String,
    /// Table comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered field list.
    pub fields: Vec<FieldSpec>,
    /// Primary key columns (empty when the table has none).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<IndexColumn>,
    /// Unique keys by logical name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_keys: BTreeMap<String, Vec<IndexColumn>>,
    /// Plain indexes by logical name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexes: BTreeMap<String, Vec<IndexColumn>>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
            primary_key: Vec::new(),
            unique_keys: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_primary_key<I, C>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.primary_key = columns(cols);
        self
    }

    pub fn with_unique_key<I, C>(mut self, name: impl Into<String>, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.unique_keys.insert(name.into(), columns(cols));
        self
    }

    pub fn with_index<I, C>(mut self, name: impl Into<String>, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.indexes.insert(name.into(), columns(cols));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldSpec> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Returns the serial field, if the table has one.
    pub fn serial_field(&self) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.field_type == FieldType::Serial)
    }

    /// Whether the primary key contains `field`.
    pub fn primary_key_contains(&self, field: &str) -> bool {
        self.primary_key.iter().any(|c| c.name == field)
    }

    /// Returns every index or unique key (by kind and name) that references `field`.
    pub fn keys_referencing(&self, field: &str) -> Vec<(IndexKind, String)> {
        let mut keys = Vec::new();
        for (name, cols) in &self.unique_keys {
            if cols.iter().any(|c| c.name == field) {
                keys.push((IndexKind::Unique, name.clone()));
            }
        }
        for (name, cols) in &self.indexes {
            if cols.iter().any(|c| c.name == field) {
                keys.push((IndexKind::Index, name.clone()));
            }
        }
        keys
    }
}

/// Kind of key or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
}

impl IndexKind {
    /// Suffix used when an engine needs globally unique index names.
    pub fn suffix(self) -> &'static str {
        match self {
            IndexKind::Primary => "pkey",
            IndexKind::Unique => "key",
            IndexKind::Index => "idx",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_value_literals() {
        assert_eq!(DefaultValue::from(5).to_sql_literal(), "5");
        assert_eq!(DefaultValue::from(1.0).to_sql_literal(), "1.0");
        assert_eq!(DefaultValue::from("a'b").to_sql_literal(), "'a''b'");
    }

    #[test]
    fn test_default_value_from_catalog_literal() {
        assert_eq!(
            DefaultValue::from_sql_literal("'it''s'"),
            Some(DefaultValue::Text("it's".into()))
        );
        assert_eq!(
            DefaultValue::from_sql_literal("''"),
            Some(DefaultValue::Text(String::new()))
        );
        assert_eq!(DefaultValue::from_sql_literal("0"), Some(DefaultValue::Integer(0)));
        assert_eq!(DefaultValue::from_sql_literal("(1.5)"), Some(DefaultValue::Float(1.5)));
        assert_eq!(DefaultValue::from_sql_literal("NULL"), None);
        assert_eq!(DefaultValue::from_sql_literal(""), None);
    }

    #[test]
    fn test_serial_is_not_null() {
        let id = FieldSpec::serial("id");
        assert!(id.not_null);
        assert!(!id.requires_initial_value());
        assert!(FieldSpec::int("n").not_null().requires_initial_value());
        assert!(!FieldSpec::int("n").not_null().default(0).requires_initial_value());
    }

    #[test]
    fn test_table_spec_yaml_round_trip() {
        let yaml = r#"
name: node
description: Content items
fields:
  - name: nid
    type: serial
  - name: title
    type: varchar
    length: 255
    not_null: true
    default: ""
  - name: body
    type: text
    size: big
primary_key: [nid]
indexes:
  title: [[title, 191]]
"#;
        let spec: TableSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "node");
        assert_eq!(spec.fields[0].field_type, FieldType::Serial);
        assert_eq!(spec.fields[1].default, Some(DefaultValue::Text(String::new())));
        assert_eq!(spec.fields[2].size, SizeClass::Big);
        assert_eq!(spec.primary_key, vec![IndexColumn::new("nid")]);
        assert_eq!(spec.indexes["title"], vec![IndexColumn::prefixed("title", 191)]);

        let json = serde_json::to_string(&spec).unwrap();
        let back: TableSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_keys_referencing() {
        let spec = TableSpec::new("t")
            .with_field(FieldSpec::int("a"))
            .with_field(FieldSpec::int("b"))
            .with_unique_key("ab", ["a", "b"])
            .with_index("b", ["b"]);
        let keys = spec.keys_referencing("b");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&(IndexKind::Unique, "ab".to_string())));
        assert!(keys.contains(&(IndexKind::Index, "b".to_string())));
        assert!(spec.keys_referencing("c").is_empty());
    }
}
