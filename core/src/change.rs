//! Structural change requests.
//!
//! A [`SchemaChange`] names one caller-level schema operation (create a
//! table, change a field, add an index, ...). Changes are applied to a
//! [`SchemaSnapshot`](crate::SchemaSnapshot) to produce the target schema,
//! and the difference between the two drives DDL generation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DefaultValue, FieldSpec, IndexColumn, TableSpec};

/// Keys to create together with an added or changed field.
///
/// # Examples
///
/// ```
/// use polysql_core::NewKeys;
///
/// let keys = NewKeys::default().primary_key(["id"]).index("name", ["name"]);
/// assert_eq!(keys.primary_key.len(), 1);
/// assert!(keys.indexes.contains_key("name"));
/// assert!(!keys.is_empty());
/// assert!(NewKeys::default().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewKeys {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<IndexColumn>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unique_keys: BTreeMap<String, Vec<IndexColumn>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indexes: BTreeMap<String, Vec<IndexColumn>>,
}

impl NewKeys {
    pub fn primary_key<I, C>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.primary_key = crate::columns(cols);
        self
    }

    pub fn unique_key<I, C>(mut self, name: impl Into<String>, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.unique_keys.insert(name.into(), crate::columns(cols));
        self
    }

    pub fn index<I, C>(mut self, name: impl Into<String>, cols: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.indexes.insert(name.into(), crate::columns(cols));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.primary_key.is_empty() && self.unique_keys.is_empty() && self.indexes.is_empty()
    }
}

/// How existing rows are populated when a field is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldInitial {
    /// A constant for every existing row.
    Value(DefaultValue),
    /// Copy of another column of the same row.
    FromField(String),
}

/// One caller-level structural change.
///
/// Table and field names are logical (unprefixed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable(TableSpec),
    DropTable {
        table: String,
    },
    RenameTable {
        table: String,
        new_name: String,
    },
    AddField {
        table: String,
        field: FieldSpec,
        #[serde(default, skip_serializing_if = "NewKeys::is_empty")]
        keys: NewKeys,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial: Option<FieldInitial>,
    },
    DropField {
        table: String,
        field: String,
    },
    /// Replaces the definition of `field`; `spec.name` may rename it.
    ChangeField {
        table: String,
        field: String,
        spec: FieldSpec,
        #[serde(default, skip_serializing_if = "NewKeys::is_empty")]
        keys: NewKeys,
    },
    SetFieldDefault {
        table: String,
        field: String,
        default: Option<DefaultValue>,
    },
    AddPrimaryKey {
        table: String,
        columns: Vec<IndexColumn>,
    },
    DropPrimaryKey {
        table: String,
    },
    AddUniqueKey {
        table: String,
        name: String,
        columns: Vec<IndexColumn>,
    },
    DropUniqueKey {
        table: String,
        name: String,
    },
    AddIndex {
        table: String,
        name: String,
        columns: Vec<IndexColumn>,
    },
    DropIndex {
        table: String,
        name: String,
    },
    SetTableComment {
        table: String,
        comment: Option<String>,
    },
    SetFieldComment {
        table: String,
        field: String,
        comment: Option<String>,
    },
}

impl SchemaChange {
    /// The logical table the change operates on.
    pub fn table(&self) -> &str {
        match self {
            SchemaChange::CreateTable(spec) => &spec.name,
            SchemaChange::DropTable { table }
            | SchemaChange::RenameTable { table, .. }
            | SchemaChange::AddField { table, .. }
            | SchemaChange::DropField { table, .. }
            | SchemaChange::ChangeField { table, .. }
            | SchemaChange::SetFieldDefault { table, .. }
            | SchemaChange::AddPrimaryKey { table, .. }
            | SchemaChange::DropPrimaryKey { table }
            | SchemaChange::AddUniqueKey { table, .. }
            | SchemaChange::DropUniqueKey { table, .. }
            | SchemaChange::AddIndex { table, .. }
            | SchemaChange::DropIndex { table, .. }
            | SchemaChange::SetTableComment { table, .. }
            | SchemaChange::SetFieldComment { table, .. } => table,
        }
    }

    /// Rename and initial-value information the diff cannot infer on its own.
    ///
    /// # Examples
    ///
    /// ```
    /// use polysql_core::{FieldSpec, SchemaChange};
    ///
    /// let change = SchemaChange::ChangeField {
    ///     table: "users".into(),
    ///     field: "name".into(),
    ///     spec: FieldSpec::varchar("login", 64),
    ///     keys: Default::default(),
    /// };
    /// let hints = change.hints();
    /// assert_eq!(hints.field_rename("users", "name"), Some("login"));
    /// ```
    pub fn hints(&self) -> DiffHints {
        let mut hints = DiffHints::default();
        match self {
            SchemaChange::RenameTable { table, new_name } => {
                hints.tables.insert(table.clone(), new_name.clone());
            }
            SchemaChange::ChangeField {
                table, field, spec, ..
            } if *field != spec.name => {
                hints
                    .fields
                    .insert((table.clone(), field.clone()), spec.name.clone());
            }
            SchemaChange::AddField {
                table,
                field,
                initial: Some(initial),
                ..
            } => {
                hints
                    .initial
                    .insert((table.clone(), field.name.clone()), initial.clone());
            }
            _ => {}
        }
        hints
    }

    /// Whether the change alters the set of tables rather than their shape.
    pub fn is_table_level(&self) -> bool {
        matches!(
            self,
            SchemaChange::CreateTable(_)
                | SchemaChange::DropTable { .. }
                | SchemaChange::RenameTable { .. }
        )
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(spec) => write!(f, "create table {}", spec.name),
            SchemaChange::DropTable { table } => write!(f, "drop table {table}"),
            SchemaChange::RenameTable { table, new_name } => {
                write!(f, "rename table {table} to {new_name}")
            }
            SchemaChange::AddField { table, field, .. } => {
                write!(f, "add field {table}.{}", field.name)
            }
            SchemaChange::DropField { table, field } => write!(f, "drop field {table}.{field}"),
            SchemaChange::ChangeField {
                table, field, spec, ..
            } => {
                if *field == spec.name {
                    write!(f, "change field {table}.{field}")
                } else {
                    write!(f, "change field {table}.{field} to {}", spec.name)
                }
            }
            SchemaChange::SetFieldDefault {
                table,
                field,
                default: Some(_),
            } => write!(f, "set default {table}.{field}"),
            SchemaChange::SetFieldDefault { table, field, .. } => {
                write!(f, "drop default {table}.{field}")
            }
            SchemaChange::AddPrimaryKey { table, .. } => write!(f, "add primary key on {table}"),
            SchemaChange::DropPrimaryKey { table } => write!(f, "drop primary key on {table}"),
            SchemaChange::AddUniqueKey { table, name, .. } => {
                write!(f, "add unique key {name} on {table}")
            }
            SchemaChange::DropUniqueKey { table, name } => {
                write!(f, "drop unique key {name} on {table}")
            }
            SchemaChange::AddIndex { table, name, .. } => write!(f, "add index {name} on {table}"),
            SchemaChange::DropIndex { table, name } => write!(f, "drop index {name} on {table}"),
            SchemaChange::SetTableComment { table, .. } => write!(f, "comment on table {table}"),
            SchemaChange::SetFieldComment { table, field, .. } => {
                write!(f, "comment on field {table}.{field}")
            }
        }
    }
}

/// Extra information for [`diff`](crate::diff): renames, keyed by the old
/// logical name, and initial values for added fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffHints {
    /// Old table name to new table name.
    pub tables: BTreeMap<String, String>,
    /// (table in the target schema, old field name) to new field name.
    pub fields: BTreeMap<(String, String), String>,
    /// (table, added field) to the initial value for existing rows.
    pub initial: BTreeMap<(String, String), FieldInitial>,
}

impl DiffHints {
    pub fn table_rename(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    pub fn field_rename(&self, table: &str, field: &str) -> Option<&str> {
        self.fields
            .get(&(table.to_string(), field.to_string()))
            .map(String::as_str)
    }

    pub fn initial(&self, table: &str, field: &str) -> Option<&FieldInitial> {
        self.initial.get(&(table.to_string(), field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_display() {
        let change = SchemaChange::AddIndex {
            table: "node".into(),
            name: "title".into(),
            columns: crate::columns(["title"]),
        };
        assert_eq!(change.to_string(), "add index title on node");
        assert_eq!(change.table(), "node");
    }

    #[test]
    fn test_hints_for_add_field_initial() {
        let change = SchemaChange::AddField {
            table: "t".into(),
            field: FieldSpec::int("weight").not_null(),
            keys: NewKeys::default(),
            initial: Some(FieldInitial::FromField("w".into())),
        };
        let hints = change.hints();
        assert_eq!(
            hints.initial("t", "weight"),
            Some(&FieldInitial::FromField("w".into()))
        );
        assert!(hints.tables.is_empty());
    }

    #[test]
    fn test_change_serializes_with_op_tag() {
        let change = SchemaChange::DropTable {
            table: "cache".into(),
        };
        let yaml = serde_yaml::to_string(&change).unwrap();
        assert!(yaml.contains("op: drop_table"));
        let back: SchemaChange = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, change);
    }
}
