//! Immutable schema snapshots.
//!
//! A [`SchemaSnapshot`] models the tables of one database (by logical name)
//! at one point in time. Applying a [`SchemaChange`] never mutates the
//! snapshot; it returns the target snapshot, leaving the original available
//! as the "from" side of a [`diff`](crate::diff).
//!
//! # Examples
//!
//! ```
//! use polysql_core::*;
//!
//! let from = SchemaSnapshot::new().with_table(
//!     TableSpec::new("users")
//!         .with_field(FieldSpec::serial("uid"))
//!         .with_primary_key(["uid"]),
//! );
//!
//! let to = from
//!     .apply(&SchemaChange::AddField {
//!         table: "users".into(),
//!         field: FieldSpec::varchar("mail", 254),
//!         keys: NewKeys::default().index("mail", ["mail"]),
//!         initial: None,
//!     })
//!     .unwrap();
//!
//! assert!(!from.table("users").unwrap().has_field("mail"));
//! assert!(to.table("users").unwrap().indexes.contains_key("mail"));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::{FieldSpec, IndexColumn, NewKeys, SchemaChange, TableSpec, validate_table};

/// The table structure of a database, keyed by logical table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSpec>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableSpec) -> Self {
        self.insert(table);
        self
    }

    /// Adds or replaces a table. Used while building a snapshot by
    /// introspection.
    pub fn insert(&mut self, table: TableSpec) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns the snapshot that results from applying `change`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the change does not fit the current
    /// structure: unknown or duplicate tables, fields, keys, or an invalid
    /// table specification for `CreateTable`.
    pub fn apply(&self, change: &SchemaChange) -> Result<SchemaSnapshot> {
        let mut next = self.clone();
        match change {
            SchemaChange::CreateTable(spec) => {
                if next.contains(&spec.name) {
                    return Err(SchemaError::TableExists(spec.name.clone()));
                }
                if let Some(error) = validate_table(spec).into_iter().next() {
                    return Err(SchemaError::Invalid {
                        table: spec.name.clone(),
                        error,
                    });
                }
                next.insert(spec.clone());
            }
            SchemaChange::DropTable { table } => {
                next.tables
                    .remove(table)
                    .ok_or_else(|| SchemaError::UnknownTable(table.clone()))?;
            }
            SchemaChange::RenameTable { table, new_name } => {
                if next.contains(new_name) {
                    return Err(SchemaError::TableExists(new_name.clone()));
                }
                let mut spec = next
                    .tables
                    .remove(table)
                    .ok_or_else(|| SchemaError::UnknownTable(table.clone()))?;
                spec.name = new_name.clone();
                next.insert(spec);
            }
            SchemaChange::AddField {
                table, field, keys, ..
            } => {
                let spec = next.table_mut(table)?;
                if spec.has_field(&field.name) {
                    return Err(field_exists(table, &field.name));
                }
                spec.fields.push(field.clone());
                add_keys(spec, keys)?;
            }
            SchemaChange::DropField { table, field } => {
                let spec = next.table_mut(table)?;
                let before = spec.fields.len();
                spec.fields.retain(|f| f.name != *field);
                if spec.fields.len() == before {
                    return Err(unknown_field(table, field));
                }
                remove_from_keys(spec, field);
            }
            SchemaChange::ChangeField {
                table,
                field,
                spec: new_field,
                keys,
            } => {
                let spec = next.table_mut(table)?;
                if *field != new_field.name && spec.has_field(&new_field.name) {
                    return Err(field_exists(table, &new_field.name));
                }
                let slot = spec
                    .field_mut(field)
                    .ok_or_else(|| unknown_field(table, field))?;
                *slot = new_field.clone();
                if *field != new_field.name {
                    rename_in_keys(spec, field, &new_field.name);
                }
                add_keys(spec, keys)?;
            }
            SchemaChange::SetFieldDefault {
                table,
                field,
                default,
            } => {
                let slot = next.field_mut(table, field)?;
                slot.default = default.clone();
            }
            SchemaChange::AddPrimaryKey { table, columns } => {
                let spec = next.table_mut(table)?;
                if !spec.primary_key.is_empty() {
                    return Err(SchemaError::PrimaryKeyExists(table.clone()));
                }
                check_columns(spec, columns)?;
                spec.primary_key = columns.clone();
            }
            SchemaChange::DropPrimaryKey { table } => {
                let spec = next.table_mut(table)?;
                if spec.primary_key.is_empty() {
                    return Err(SchemaError::NoPrimaryKey(table.clone()));
                }
                spec.primary_key.clear();
            }
            SchemaChange::AddUniqueKey {
                table,
                name,
                columns,
            } => {
                let spec = next.table_mut(table)?;
                check_new_key(spec, name)?;
                check_columns(spec, columns)?;
                spec.unique_keys.insert(name.clone(), columns.clone());
            }
            SchemaChange::DropUniqueKey { table, name } => {
                let spec = next.table_mut(table)?;
                spec.unique_keys
                    .remove(name)
                    .ok_or_else(|| unknown_index(table, name))?;
            }
            SchemaChange::AddIndex {
                table,
                name,
                columns,
            } => {
                let spec = next.table_mut(table)?;
                check_new_key(spec, name)?;
                check_columns(spec, columns)?;
                spec.indexes.insert(name.clone(), columns.clone());
            }
            SchemaChange::DropIndex { table, name } => {
                let spec = next.table_mut(table)?;
                spec.indexes
                    .remove(name)
                    .ok_or_else(|| unknown_index(table, name))?;
            }
            SchemaChange::SetTableComment { table, comment } => {
                next.table_mut(table)?.description = comment.clone();
            }
            SchemaChange::SetFieldComment {
                table,
                field,
                comment,
            } => {
                next.field_mut(table, field)?.description = comment.clone();
            }
        }
        Ok(next)
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableSpec> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }

    fn field_mut(&mut self, table: &str, field: &str) -> Result<&mut FieldSpec> {
        self.table_mut(table)?
            .field_mut(field)
            .ok_or_else(|| unknown_field(table, field))
    }
}

impl FromIterator<TableSpec> for SchemaSnapshot {
    fn from_iter<I: IntoIterator<Item = TableSpec>>(iter: I) -> Self {
        let mut snapshot = SchemaSnapshot::new();
        for table in iter {
            snapshot.insert(table);
        }
        snapshot
    }
}

fn unknown_field(table: &str, field: &str) -> SchemaError {
    SchemaError::UnknownField {
        table: table.to_string(),
        field: field.to_string(),
    }
}

fn field_exists(table: &str, field: &str) -> SchemaError {
    SchemaError::FieldExists {
        table: table.to_string(),
        field: field.to_string(),
    }
}

fn unknown_index(table: &str, name: &str) -> SchemaError {
    SchemaError::UnknownIndex {
        table: table.to_string(),
        name: name.to_string(),
    }
}

fn check_new_key(spec: &TableSpec, name: &str) -> Result<()> {
    if spec.unique_keys.contains_key(name) || spec.indexes.contains_key(name) {
        return Err(SchemaError::IndexExists {
            table: spec.name.clone(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn check_columns(spec: &TableSpec, columns: &[IndexColumn]) -> Result<()> {
    match columns.iter().find(|c| !spec.has_field(&c.name)) {
        Some(missing) => Err(unknown_field(&spec.name, &missing.name)),
        None => Ok(()),
    }
}

fn add_keys(spec: &mut TableSpec, keys: &NewKeys) -> Result<()> {
    if !keys.primary_key.is_empty() {
        if !spec.primary_key.is_empty() {
            return Err(SchemaError::PrimaryKeyExists(spec.name.clone()));
        }
        check_columns(spec, &keys.primary_key)?;
        spec.primary_key = keys.primary_key.clone();
    }
    for (name, cols) in &keys.unique_keys {
        check_new_key(spec, name)?;
        check_columns(spec, cols)?;
        spec.unique_keys.insert(name.clone(), cols.clone());
    }
    for (name, cols) in &keys.indexes {
        check_new_key(spec, name)?;
        check_columns(spec, cols)?;
        spec.indexes.insert(name.clone(), cols.clone());
    }
    Ok(())
}

fn remove_from_keys(spec: &mut TableSpec, field: &str) {
    spec.primary_key.retain(|c| c.name != field);
    for cols in spec.unique_keys.values_mut().chain(spec.indexes.values_mut()) {
        cols.retain(|c| c.name != field);
    }
    spec.unique_keys.retain(|_, cols| !cols.is_empty());
    spec.indexes.retain(|_, cols| !cols.is_empty());
}

fn rename_in_keys(spec: &mut TableSpec, from: &str, to: &str) {
    let keys = spec
        .primary_key
        .iter_mut()
        .chain(spec.unique_keys.values_mut().flatten())
        .chain(spec.indexes.values_mut().flatten());
    for col in keys {
        if col.name == from {
            col.name = to.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DefaultValue, FieldSpec};

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new().with_table(
            TableSpec::new("node")
                .with_field(FieldSpec::serial("nid"))
                .with_field(FieldSpec::varchar("title", 128).not_null().default(""))
                .with_field(FieldSpec::int("uid").not_null().default(0))
                .with_primary_key(["nid"])
                .with_index("title_uid", ["title", "uid"])
                .with_index("uid", ["uid"]),
        )
    }

    #[test]
    fn test_apply_leaves_original_untouched() {
        let from = snapshot();
        let to = from
            .apply(&SchemaChange::DropTable {
                table: "node".into(),
            })
            .unwrap();
        assert!(from.contains("node"));
        assert!(to.is_empty());
    }

    #[test]
    fn test_drop_field_removes_key_columns() {
        let to = snapshot()
            .apply(&SchemaChange::DropField {
                table: "node".into(),
                field: "uid".into(),
            })
            .unwrap();
        let node = to.table("node").unwrap();
        assert!(!node.has_field("uid"));
        assert_eq!(node.indexes.get("title_uid"), Some(&crate::columns(["title"])));
        assert!(!node.indexes.contains_key("uid"));
    }

    #[test]
    fn test_change_field_rename_updates_keys() {
        let to = snapshot()
            .apply(&SchemaChange::ChangeField {
                table: "node".into(),
                field: "uid".into(),
                spec: FieldSpec::int("author").not_null().default(0),
                keys: NewKeys::default(),
            })
            .unwrap();
        let node = to.table("node").unwrap();
        assert_eq!(node.fields[2].name, "author");
        assert_eq!(node.indexes["uid"], crate::columns(["author"]));
    }

    #[test]
    fn test_change_field_rejects_existing_target() {
        let err = snapshot()
            .apply(&SchemaChange::ChangeField {
                table: "node".into(),
                field: "uid".into(),
                spec: FieldSpec::int("title"),
                keys: NewKeys::default(),
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::FieldExists { .. }));
    }

    #[test]
    fn test_duplicate_index_names_across_kinds() {
        let err = snapshot()
            .apply(&SchemaChange::AddUniqueKey {
                table: "node".into(),
                name: "uid".into(),
                columns: crate::columns(["uid"]),
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::IndexExists { .. }));
    }

    #[test]
    fn test_primary_key_transitions() {
        let s = snapshot();
        assert!(matches!(
            s.apply(&SchemaChange::AddPrimaryKey {
                table: "node".into(),
                columns: crate::columns(["uid"]),
            }),
            Err(SchemaError::PrimaryKeyExists(_))
        ));
        let dropped = s
            .apply(&SchemaChange::DropPrimaryKey {
                table: "node".into(),
            })
            .unwrap();
        assert!(dropped.table("node").unwrap().primary_key.is_empty());
        assert!(matches!(
            dropped.apply(&SchemaChange::DropPrimaryKey {
                table: "node".into()
            }),
            Err(SchemaError::NoPrimaryKey(_))
        ));
    }

    #[test]
    fn test_set_default_and_rename_table() {
        let s = snapshot()
            .apply(&SchemaChange::SetFieldDefault {
                table: "node".into(),
                field: "title".into(),
                default: Some(DefaultValue::from("untitled")),
            })
            .unwrap()
            .apply(&SchemaChange::RenameTable {
                table: "node".into(),
                new_name: "content".into(),
            })
            .unwrap();
        let content = s.table("content").unwrap();
        assert_eq!(content.name, "content");
        assert_eq!(
            content.field("title").unwrap().default,
            Some(DefaultValue::from("untitled"))
        );
    }

    #[test]
    fn test_create_table_validates_spec() {
        let err = SchemaSnapshot::new()
            .apply(&SchemaChange::CreateTable(TableSpec::new("empty")))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }
}
