//! Pure structural diff between two schema snapshots.
//!
//! [`diff`] compares a "from" and a "to" [`SchemaSnapshot`] and returns the
//! ordered list of [`DiffOp`]s that transforms one into the other. The
//! order is fixed so that each operation is valid when the previous ones
//! have run:
//!
//! 1. table renames
//! 2. table creates
//! 3. table drops
//! 4. key and index drops
//! 5. field drops
//! 6. field alterations (including renames)
//! 7. field additions
//! 8. key and index additions
//! 9. table comments
//!
//! Renames cannot be inferred from two snapshots alone, so they come in
//! through [`DiffHints`]. Without a hint a renamed field shows up as a drop
//! plus an add.
//!
//! # Examples
//!
//! ```
//! use polysql_core::*;
//!
//! let from = SchemaSnapshot::new().with_table(
//!     TableSpec::new("t")
//!         .with_field(FieldSpec::int("a"))
//!         .with_index("a", ["a"]),
//! );
//! assert!(diff(&from, &from, &DiffHints::default()).is_empty());
//!
//! let change = SchemaChange::DropField { table: "t".into(), field: "a".into() };
//! let to = from.apply(&change).unwrap();
//! let ops = diff(&from, &to, &change.hints());
//! assert_eq!(
//!     ops,
//!     vec![
//!         DiffOp::DropIndex { table: "t".into(), name: "a".into() },
//!         DiffOp::DropField { table: "t".into(), field: "a".into() },
//!     ]
//! );
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::{
    DiffHints, FieldInitial, FieldSpec, IndexColumn, NewKeys, SchemaChange, SchemaSnapshot, TableSpec,
};

/// One structural operation produced by [`diff`].
///
/// Table names refer to the table's name after any rename in the same diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    RenameTable {
        from: String,
        to: String,
    },
    CreateTable(TableSpec),
    DropTable {
        table: String,
    },
    DropPrimaryKey {
        table: String,
    },
    DropUniqueKey {
        table: String,
        name: String,
    },
    DropIndex {
        table: String,
        name: String,
    },
    DropField {
        table: String,
        field: String,
    },
    /// Definition change; `from.name != to.name` for renames.
    AlterField {
        table: String,
        from: FieldSpec,
        to: FieldSpec,
    },
    AddField {
        table: String,
        field: FieldSpec,
        #[serde(skip_serializing_if = "Option::is_none")]
        initial: Option<FieldInitial>,
    },
    AddPrimaryKey {
        table: String,
        columns: Vec<IndexColumn>,
    },
    AddUniqueKey {
        table: String,
        name: String,
        columns: Vec<IndexColumn>,
    },
    AddIndex {
        table: String,
        name: String,
        columns: Vec<IndexColumn>,
    },
    SetTableComment {
        table: String,
        comment: Option<String>,
    },
}

impl DiffOp {
    /// The table the operation touches (the new name for renames).
    pub fn table(&self) -> &str {
        match self {
            DiffOp::RenameTable { to, .. } => to,
            DiffOp::CreateTable(spec) => &spec.name,
            DiffOp::DropTable { table }
            | DiffOp::DropPrimaryKey { table }
            | DiffOp::DropUniqueKey { table, .. }
            | DiffOp::DropIndex { table, .. }
            | DiffOp::DropField { table, .. }
            | DiffOp::AlterField { table, .. }
            | DiffOp::AddField { table, .. }
            | DiffOp::AddPrimaryKey { table, .. }
            | DiffOp::AddUniqueKey { table, .. }
            | DiffOp::AddIndex { table, .. }
            | DiffOp::SetTableComment { table, .. } => table,
        }
    }
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOp::RenameTable { from, to } => write!(f, "rename table {from} -> {to}"),
            DiffOp::CreateTable(spec) => write!(f, "create table {}", spec.name),
            DiffOp::DropTable { table } => write!(f, "drop table {table}"),
            DiffOp::DropPrimaryKey { table } => write!(f, "drop primary key {table}"),
            DiffOp::DropUniqueKey { table, name } => write!(f, "drop unique key {table}.{name}"),
            DiffOp::DropIndex { table, name } => write!(f, "drop index {table}.{name}"),
            DiffOp::DropField { table, field } => write!(f, "drop field {table}.{field}"),
            DiffOp::AlterField { table, from, to } if from.name != to.name => {
                write!(f, "alter field {table}.{} -> {}", from.name, to.name)
            }
            DiffOp::AlterField { table, to, .. } => write!(f, "alter field {table}.{}", to.name),
            DiffOp::AddField { table, field, .. } => write!(f, "add field {table}.{}", field.name),
            DiffOp::AddPrimaryKey { table, .. } => write!(f, "add primary key {table}"),
            DiffOp::AddUniqueKey { table, name, .. } => write!(f, "add unique key {table}.{name}"),
            DiffOp::AddIndex { table, name, .. } => write!(f, "add index {table}.{name}"),
            DiffOp::SetTableComment { table, .. } => write!(f, "comment on table {table}"),
        }
    }
}

/// Each diff operation is also a caller-level change, so a computed plan can
/// be applied one step at a time.
impl From<DiffOp> for SchemaChange {
    fn from(op: DiffOp) -> Self {
        match op {
            DiffOp::RenameTable { from, to } => SchemaChange::RenameTable {
                table: from,
                new_name: to,
            },
            DiffOp::CreateTable(spec) => SchemaChange::CreateTable(spec),
            DiffOp::DropTable { table } => SchemaChange::DropTable { table },
            DiffOp::DropPrimaryKey { table } => SchemaChange::DropPrimaryKey { table },
            DiffOp::DropUniqueKey { table, name } => SchemaChange::DropUniqueKey { table, name },
            DiffOp::DropIndex { table, name } => SchemaChange::DropIndex { table, name },
            DiffOp::DropField { table, field } => SchemaChange::DropField { table, field },
            DiffOp::AlterField { table, from, to } => SchemaChange::ChangeField {
                table,
                field: from.name,
                spec: to,
                keys: NewKeys::default(),
            },
            DiffOp::AddField {
                table,
                field,
                initial,
            } => SchemaChange::AddField {
                table,
                field,
                keys: NewKeys::default(),
                initial,
            },
            DiffOp::AddPrimaryKey { table, columns } => {
                SchemaChange::AddPrimaryKey { table, columns }
            }
            DiffOp::AddUniqueKey {
                table,
                name,
                columns,
            } => SchemaChange::AddUniqueKey {
                table,
                name,
                columns,
            },
            DiffOp::AddIndex {
                table,
                name,
                columns,
            } => SchemaChange::AddIndex {
                table,
                name,
                columns,
            },
            DiffOp::SetTableComment { table, comment } => {
                SchemaChange::SetTableComment { table, comment }
            }
        }
    }
}

#[derive(Default)]
struct Phases {
    renames: Vec<DiffOp>,
    creates: Vec<DiffOp>,
    drops: Vec<DiffOp>,
    key_drops: Vec<DiffOp>,
    field_drops: Vec<DiffOp>,
    alters: Vec<DiffOp>,
    adds: Vec<DiffOp>,
    key_adds: Vec<DiffOp>,
    comments: Vec<DiffOp>,
}

impl Phases {
    fn into_ops(self) -> Vec<DiffOp> {
        [
            self.renames,
            self.creates,
            self.drops,
            self.key_drops,
            self.field_drops,
            self.alters,
            self.adds,
            self.key_adds,
            self.comments,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Computes the operations that turn `from` into `to`.
///
/// The function is pure: equal inputs yield equal outputs, and
/// `diff(s, s, _)` is always empty.
pub fn diff(from: &SchemaSnapshot, to: &SchemaSnapshot, hints: &DiffHints) -> Vec<DiffOp> {
    let mut phases = Phases::default();

    // old name -> new name for every table of `from` that survives
    let mut targets: BTreeMap<&str, &str> = BTreeMap::new();
    for table in from.tables() {
        let renamed = hints
            .table_rename(&table.name)
            .filter(|new| to.contains(new) && !from.contains(new));
        match renamed {
            Some(new) => {
                phases.renames.push(DiffOp::RenameTable {
                    from: table.name.clone(),
                    to: new.to_string(),
                });
                targets.insert(&table.name, new);
            }
            None if to.contains(&table.name) => {
                targets.insert(&table.name, &table.name);
            }
            None => phases.drops.push(DiffOp::DropTable {
                table: table.name.clone(),
            }),
        }
    }

    let kept: BTreeSet<&str> = targets.values().copied().collect();
    for table in to.tables() {
        if !kept.contains(table.name.as_str()) {
            phases.creates.push(DiffOp::CreateTable(table.clone()));
        }
    }

    for (old, new) in targets {
        if let (Some(a), Some(b)) = (from.table(old), to.table(new)) {
            diff_table(a, b, hints, &mut phases);
        }
    }

    phases.into_ops()
}

fn diff_table(from: &TableSpec, to: &TableSpec, hints: &DiffHints, phases: &mut Phases) {
    let table = to.name.as_str();

    // old field name -> name in `to`
    let mut renames: BTreeMap<&str, &str> = BTreeMap::new();
    for field in &from.fields {
        let name = hints
            .field_rename(table, &field.name)
            .filter(|new| to.has_field(new) && !from.has_field(new))
            .unwrap_or(field.name.as_str());
        if to.has_field(name) {
            renames.insert(&field.name, name);
        }
    }
    let map_cols = |cols: &[IndexColumn]| -> Vec<IndexColumn> {
        cols.iter()
            .map(|c| IndexColumn {
                name: renames
                    .get(c.name.as_str())
                    .map_or_else(|| c.name.clone(), |n| n.to_string()),
                length: c.length,
            })
            .collect()
    };

    let mapped_pk = map_cols(&from.primary_key);
    if mapped_pk != to.primary_key {
        if !from.primary_key.is_empty() {
            phases.key_drops.push(DiffOp::DropPrimaryKey {
                table: table.to_string(),
            });
        }
        if !to.primary_key.is_empty() {
            phases.key_adds.push(DiffOp::AddPrimaryKey {
                table: table.to_string(),
                columns: to.primary_key.clone(),
            });
        }
    }

    for (name, cols) in &from.unique_keys {
        if to.unique_keys.get(name) != Some(&map_cols(cols)) {
            phases.key_drops.push(DiffOp::DropUniqueKey {
                table: table.to_string(),
                name: name.clone(),
            });
        }
    }
    for (name, cols) in &from.indexes {
        if to.indexes.get(name) != Some(&map_cols(cols)) {
            phases.key_drops.push(DiffOp::DropIndex {
                table: table.to_string(),
                name: name.clone(),
            });
        }
    }

    for field in &from.fields {
        if !renames.contains_key(field.name.as_str()) {
            phases.field_drops.push(DiffOp::DropField {
                table: table.to_string(),
                field: field.name.clone(),
            });
        }
    }

    for field in &to.fields {
        let source = renames
            .iter()
            .find(|(_, new)| **new == field.name)
            .and_then(|(old, _)| from.field(old));
        match source {
            Some(old) if old == field => {}
            Some(old) => phases.alters.push(DiffOp::AlterField {
                table: table.to_string(),
                from: old.clone(),
                to: field.clone(),
            }),
            None => phases.adds.push(DiffOp::AddField {
                table: table.to_string(),
                field: field.clone(),
                initial: hints.initial(table, &field.name).cloned(),
            }),
        }
    }

    for (name, cols) in &to.unique_keys {
        let unchanged = from
            .unique_keys
            .get(name)
            .is_some_and(|old| map_cols(old) == *cols);
        if !unchanged {
            phases.key_adds.push(DiffOp::AddUniqueKey {
                table: table.to_string(),
                name: name.clone(),
                columns: cols.clone(),
            });
        }
    }
    for (name, cols) in &to.indexes {
        let unchanged = from
            .indexes
            .get(name)
            .is_some_and(|old| map_cols(old) == *cols);
        if !unchanged {
            phases.key_adds.push(DiffOp::AddIndex {
                table: table.to_string(),
                name: name.clone(),
                columns: cols.clone(),
            });
        }
    }

    if from.description != to.description {
        phases.comments.push(DiffOp::SetTableComment {
            table: table.to_string(),
            comment: to.description.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldSpec, NewKeys, SchemaChange};

    fn users() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(
                TableSpec::new("users")
                    .with_field(FieldSpec::serial("uid"))
                    .with_field(FieldSpec::varchar("name", 32))
                    .with_field(FieldSpec::varchar("mail", 254))
                    .with_primary_key(["uid"])
                    .with_unique_key("name", ["name"])
                    .with_index("mail", ["mail"]),
            )
            .with_table(TableSpec::new("cache").with_field(FieldSpec::blob("data")))
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let s = users();
        assert!(diff(&s, &s, &DiffHints::default()).is_empty());
        let empty = SchemaSnapshot::new();
        assert!(diff(&empty, &empty, &DiffHints::default()).is_empty());
    }

    #[test]
    fn test_diff_alter_field_type() {
        let from = users();
        let change = SchemaChange::ChangeField {
            table: "users".into(),
            field: "name".into(),
            spec: FieldSpec::varchar("name", 64).not_null().default(""),
            keys: NewKeys::default(),
        };
        let to = from.apply(&change).unwrap();
        let ops = diff(&from, &to, &change.hints());
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], DiffOp::AlterField { to, .. } if to.length == Some(64)));
    }

    #[test]
    fn test_diff_field_rename_keeps_keys() {
        let from = users();
        let change = SchemaChange::ChangeField {
            table: "users".into(),
            field: "name".into(),
            spec: FieldSpec::varchar("login", 32),
            keys: NewKeys::default(),
        };
        let to = from.apply(&change).unwrap();

        let ops = diff(&from, &to, &change.hints());
        assert_eq!(ops.len(), 1, "{ops:?}");
        assert!(matches!(&ops[0], DiffOp::AlterField { from, to, .. }
            if from.name == "name" && to.name == "login"));

        // without the hint the rename degrades to drop + add
        let ops = diff(&from, &to, &DiffHints::default());
        assert!(ops.iter().any(|op| matches!(op, DiffOp::DropField { field, .. } if field == "name")));
        assert!(ops.iter().any(|op| matches!(op, DiffOp::AddField { field, .. } if field.name == "login")));
    }

    #[test]
    fn test_diff_table_rename() {
        let from = users();
        let change = SchemaChange::RenameTable {
            table: "cache".into(),
            new_name: "cache_page".into(),
        };
        let to = from.apply(&change).unwrap();
        assert_eq!(
            diff(&from, &to, &change.hints()),
            vec![DiffOp::RenameTable {
                from: "cache".into(),
                to: "cache_page".into()
            }]
        );
    }

    #[test]
    fn test_diff_phase_order() {
        let from = users();
        let to = from
            .apply(&SchemaChange::DropField {
                table: "users".into(),
                field: "mail".into(),
            })
            .unwrap()
            .apply(&SchemaChange::AddField {
                table: "users".into(),
                field: FieldSpec::int("status").not_null().default(1),
                keys: NewKeys::default().index("status", ["status"]),
                initial: None,
            })
            .unwrap()
            .apply(&SchemaChange::CreateTable(
                TableSpec::new("roles").with_field(FieldSpec::varchar("name", 64)),
            ))
            .unwrap();

        let ops = diff(&from, &to, &DiffHints::default());
        let names: Vec<String> = ops.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec![
                "create table roles",
                "drop index users.mail",
                "drop field users.mail",
                "add field users.status",
                "add index users.status",
            ]
        );
    }

    #[test]
    fn test_diff_changed_key_columns_drop_then_add() {
        let from = users();
        let to = from
            .apply(&SchemaChange::DropIndex {
                table: "users".into(),
                name: "mail".into(),
            })
            .unwrap()
            .apply(&SchemaChange::AddIndex {
                table: "users".into(),
                name: "mail".into(),
                columns: crate::columns(["mail", "name"]),
            })
            .unwrap();
        let ops = diff(&from, &to, &DiffHints::default());
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], DiffOp::DropIndex { .. }));
        assert!(matches!(ops[1], DiffOp::AddIndex { .. }));
    }

    #[test]
    fn test_diff_carries_initial_value_hint() {
        let from = users();
        let change = SchemaChange::AddField {
            table: "users".into(),
            field: FieldSpec::varchar("display", 32).not_null(),
            keys: NewKeys::default(),
            initial: Some(FieldInitial::FromField("name".into())),
        };
        let to = from.apply(&change).unwrap();
        let ops = diff(&from, &to, &change.hints());
        assert!(matches!(&ops[0], DiffOp::AddField { initial: Some(FieldInitial::FromField(f)), .. } if f == "name"));
    }

    #[test]
    fn test_alter_field_becomes_change_field() {
        let op = DiffOp::AlterField {
            table: "users".into(),
            from: FieldSpec::varchar("name", 32),
            to: FieldSpec::varchar("login", 64),
        };
        let change = SchemaChange::from(op);
        assert_eq!(change.to_string(), "change field users.name to login");
    }
}
