//! Schema migration.
//!
//! Every structural change follows the same path:
//!
//! 1. take the cached [`SchemaSnapshot`], introspecting it if needed;
//! 2. apply the change to a copy, giving the target snapshot;
//! 3. offer the change to the extension, which may apply it its own way
//!    (SQLite rebuilds tables, MySQL folds keys into one ALTER TABLE);
//! 4. otherwise diff the two snapshots and run the DDL for each operation,
//!    engine-specific where the extension provides it and generic elsewhere;
//! 5. cache the target snapshot, or drop the cache when the extension
//!    changed things the snapshot does not model or anything failed.
//!
//! [`Schema`] is the caller-facing facade over this path.

use std::sync::Arc;

use polysql_core::{
    DefaultValue, DiffHints, DiffOp, FieldInitial, FieldSpec, IndexColumn, NewKeys, SchemaChange,
    SchemaSnapshot, TableSpec, diff,
};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{ErrorKind, Result};
use crate::extension::{Applied, Outcome, ddl};

impl Connection {
    /// Schema operations on this connection.
    pub fn schema(&mut self) -> Schema<'_> {
        Schema { conn: self }
    }

    /// Applies one structural change.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Schema`](crate::DbError::Schema) when the change
    /// does not fit the current schema, and the classified driver error
    /// when a statement fails. The cached snapshot is dropped on failure.
    pub fn apply_change(&mut self, change: &SchemaChange) -> Result<()> {
        let from = self.schema_snapshot()?.clone();
        let mut to = from.apply(change)?;
        let ext = Arc::clone(&self.extension);
        let target = match change {
            SchemaChange::RenameTable { new_name, .. } => new_name.as_str(),
            _ => change.table(),
        };
        if let Some(spec) = to.table(target).cloned() {
            to.insert(ext.normalize_table(spec));
        }

        info!(change = %change, engine = %ext.engine(), "applying schema change");
        let applied = match ext.apply_change(self, &from, &to, change) {
            Ok(Outcome::Handled(applied)) => Ok(applied),
            Ok(Outcome::NotHandled) => self
                .run_diff(&from, &to, &change.hints())
                .map(|()| Applied::Synced),
            Err(err) => Err(err),
        };
        match applied {
            Ok(Applied::Synced) => {
                self.snapshot = Some(to);
                Ok(())
            }
            Ok(Applied::OutOfBand) => {
                debug!(change = %change, "schema changed out of band");
                self.snapshot = None;
                Ok(())
            }
            Err(err) => {
                self.snapshot = None;
                Err(err)
            }
        }
    }

    fn run_diff(&mut self, from: &SchemaSnapshot, to: &SchemaSnapshot, hints: &DiffHints) -> Result<()> {
        for op in diff(from, to, hints) {
            match op {
                DiffOp::AddField {
                    table,
                    field,
                    initial: Some(initial),
                } => self.add_field_with_initial(from, to, &table, &field, &initial)?,
                op => self.run_op(&op, from, to)?,
            }
        }
        Ok(())
    }

    /// Adds the field as nullable, fills it, then tightens it to its final
    /// definition.
    fn add_field_with_initial(
        &mut self,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        table: &str,
        field: &FieldSpec,
        initial: &FieldInitial,
    ) -> Result<()> {
        let mut relaxed = field.clone();
        relaxed.not_null = false;
        self.run_op(
            &DiffOp::AddField {
                table: table.to_string(),
                field: relaxed.clone(),
                initial: None,
            },
            from,
            to,
        )?;
        let value = match initial {
            FieldInitial::Value(value) => value.to_sql_literal(),
            FieldInitial::FromField(other) => self.names.field(other),
        };
        let sql = format!(
            "UPDATE {} SET {} = {value}",
            self.names.table(table),
            self.names.field(&field.name)
        );
        self.execute_raw(&sql)?;
        if relaxed != *field {
            self.run_op(
                &DiffOp::AlterField {
                    table: table.to_string(),
                    from: relaxed,
                    to: field.clone(),
                },
                from,
                to,
            )?;
        }
        Ok(())
    }

    fn run_op(&mut self, op: &DiffOp, from: &SchemaSnapshot, to: &SchemaSnapshot) -> Result<()> {
        let ext = Arc::clone(&self.extension);
        let statements = match ext.diff_sql(&mut self.names, op, from, to)? {
            Outcome::Handled(statements) => statements,
            Outcome::NotHandled => ddl::generic_sql(ext.as_ref(), &mut self.names, op)?,
        };
        debug!(op = %op, statements = statements.len(), "running diff operation");
        for sql in statements {
            self.execute_raw(&sql)?;
        }
        Ok(())
    }
}

/// Schema operations on one connection.
///
/// Table and field names are logical; the connection adds the prefix.
///
/// # Examples
///
/// ```no_run
/// use polysql_core::{FieldSpec, NewKeys, TableSpec};
/// # fn demo(conn: &mut polysql_db::Connection) -> polysql_db::Result<()> {
/// let mut schema = conn.schema();
/// schema.create_table(
///     &TableSpec::new("t")
///         .with_field(FieldSpec::serial("id"))
///         .with_field(FieldSpec::varchar("name", 32))
///         .with_primary_key(["id"]),
/// )?;
/// schema.change_field("t", "name", FieldSpec::varchar("name", 64).not_null().default(""), NewKeys::default())?;
/// assert!(schema.field_exists("t", "name")?);
/// # Ok(())
/// # }
/// ```
pub struct Schema<'c> {
    conn: &'c mut Connection,
}

impl Schema<'_> {
    /// Creates a table with its keys and indexes.
    ///
    /// # Errors
    ///
    /// Fails if the table exists or the specification is invalid.
    pub fn create_table(&mut self, spec: &TableSpec) -> Result<()> {
        self.conn.apply_change(&SchemaChange::CreateTable(spec.clone()))
    }

    /// Drops a table. Returns `false` if it did not exist.
    pub fn drop_table(&mut self, table: &str) -> Result<bool> {
        if !self.conn.schema_snapshot()?.contains(table) {
            return Ok(false);
        }
        self.conn.apply_change(&SchemaChange::DropTable {
            table: table.to_string(),
        })?;
        Ok(true)
    }

    pub fn rename_table(&mut self, table: &str, new_name: &str) -> Result<()> {
        self.conn.apply_change(&SchemaChange::RenameTable {
            table: table.to_string(),
            new_name: new_name.to_string(),
        })
    }

    /// Adds a field, optionally with keys over it.
    pub fn add_field(&mut self, table: &str, field: FieldSpec, keys: NewKeys) -> Result<()> {
        self.conn.apply_change(&SchemaChange::AddField {
            table: table.to_string(),
            field,
            keys,
            initial: None,
        })
    }

    /// Adds a field and fills existing rows with `initial`.
    pub fn add_field_with_initial(
        &mut self,
        table: &str,
        field: FieldSpec,
        keys: NewKeys,
        initial: FieldInitial,
    ) -> Result<()> {
        self.conn.apply_change(&SchemaChange::AddField {
            table: table.to_string(),
            field,
            keys,
            initial: Some(initial),
        })
    }

    /// Drops a field. Returns `false` if it did not exist.
    pub fn drop_field(&mut self, table: &str, field: &str) -> Result<bool> {
        if !self.field_exists(table, field)? {
            return Ok(false);
        }
        self.conn.apply_change(&SchemaChange::DropField {
            table: table.to_string(),
            field: field.to_string(),
        })?;
        Ok(true)
    }

    /// Replaces the definition of `field`; `spec.name` may rename it.
    pub fn change_field(
        &mut self,
        table: &str,
        field: &str,
        spec: FieldSpec,
        keys: NewKeys,
    ) -> Result<()> {
        self.conn.apply_change(&SchemaChange::ChangeField {
            table: table.to_string(),
            field: field.to_string(),
            spec,
            keys,
        })
    }

    pub fn field_set_default(
        &mut self,
        table: &str,
        field: &str,
        default: impl Into<DefaultValue>,
    ) -> Result<()> {
        self.conn.apply_change(&SchemaChange::SetFieldDefault {
            table: table.to_string(),
            field: field.to_string(),
            default: Some(default.into()),
        })
    }

    pub fn field_set_no_default(&mut self, table: &str, field: &str) -> Result<()> {
        self.conn.apply_change(&SchemaChange::SetFieldDefault {
            table: table.to_string(),
            field: field.to_string(),
            default: None,
        })
    }

    pub fn add_primary_key<I, C>(&mut self, table: &str, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.conn.apply_change(&SchemaChange::AddPrimaryKey {
            table: table.to_string(),
            columns: polysql_core::columns(columns),
        })
    }

    /// Drops the primary key. Returns `false` if there was none.
    pub fn drop_primary_key(&mut self, table: &str) -> Result<bool> {
        let has_key = self
            .table(table)?
            .is_some_and(|spec| !spec.primary_key.is_empty());
        if !has_key {
            return Ok(false);
        }
        self.conn.apply_change(&SchemaChange::DropPrimaryKey {
            table: table.to_string(),
        })?;
        Ok(true)
    }

    pub fn add_unique_key<I, C>(&mut self, table: &str, name: &str, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.conn.apply_change(&SchemaChange::AddUniqueKey {
            table: table.to_string(),
            name: name.to_string(),
            columns: polysql_core::columns(columns),
        })
    }

    /// Drops a unique key. Returns `false` if it did not exist.
    pub fn drop_unique_key(&mut self, table: &str, name: &str) -> Result<bool> {
        let exists = self
            .table(table)?
            .is_some_and(|spec| spec.unique_keys.contains_key(name));
        if !exists {
            return Ok(false);
        }
        self.conn.apply_change(&SchemaChange::DropUniqueKey {
            table: table.to_string(),
            name: name.to_string(),
        })?;
        Ok(true)
    }

    pub fn add_index<I, C>(&mut self, table: &str, name: &str, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        self.conn.apply_change(&SchemaChange::AddIndex {
            table: table.to_string(),
            name: name.to_string(),
            columns: polysql_core::columns(columns),
        })
    }

    /// Drops an index. Returns `false` if it did not exist.
    pub fn drop_index(&mut self, table: &str, name: &str) -> Result<bool> {
        let exists = self
            .table(table)?
            .is_some_and(|spec| spec.indexes.contains_key(name));
        if !exists {
            return Ok(false);
        }
        self.conn.apply_change(&SchemaChange::DropIndex {
            table: table.to_string(),
            name: name.to_string(),
        })?;
        Ok(true)
    }

    pub fn table_comment(&mut self, table: &str) -> Result<Option<String>> {
        Ok(self.table(table)?.and_then(|spec| spec.description))
    }

    pub fn set_table_comment(&mut self, table: &str, comment: Option<&str>) -> Result<()> {
        self.conn.apply_change(&SchemaChange::SetTableComment {
            table: table.to_string(),
            comment: comment.map(str::to_string),
        })
    }

    pub fn field_comment(&mut self, table: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .table(table)?
            .and_then(|spec| spec.field(field).and_then(|f| f.description.clone())))
    }

    pub fn set_field_comment(&mut self, table: &str, field: &str, comment: Option<&str>) -> Result<()> {
        self.conn.apply_change(&SchemaChange::SetFieldComment {
            table: table.to_string(),
            field: field.to_string(),
            comment: comment.map(str::to_string),
        })
    }

    /// Whether the table exists in the database.
    ///
    /// Uses the engine's cheap probe query when it has one and the catalog
    /// otherwise. Connection failures are reported; any other probe error
    /// means the table is missing.
    pub fn table_exists(&mut self, table: &str) -> Result<bool> {
        let ext = Arc::clone(&self.conn.extension);
        let quoted = self.conn.names.table(table);
        if let Some(sql) = ext.probe_sql(&quoted) {
            return match self.conn.query_catalog(&sql, ()) {
                Ok(_) => Ok(true),
                Err(err) if err.kind() == ErrorKind::ConnectionFailure => Err(err),
                Err(err) => {
                    debug!(table, error = %err, "table probe failed");
                    Ok(false)
                }
            };
        }
        let physical = self.conn.names.physical_table(table);
        Ok(ext.list_tables(self.conn)?.contains(&physical))
    }

    pub fn field_exists(&mut self, table: &str, field: &str) -> Result<bool> {
        Ok(self.table(table)?.is_some_and(|spec| spec.has_field(field)))
    }

    /// Whether `name` is a unique key or index of the table. `PRIMARY`
    /// names the primary key.
    pub fn index_exists(&mut self, table: &str, name: &str) -> Result<bool> {
        Ok(self.table(table)?.is_some_and(|spec| {
            if name.eq_ignore_ascii_case("primary") {
                !spec.primary_key.is_empty()
            } else {
                spec.unique_keys.contains_key(name) || spec.indexes.contains_key(name)
            }
        }))
    }

    /// Logical names of the tables matching a LIKE `pattern`.
    pub fn find_tables(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.conn.find_tables(pattern)
    }

    /// The table as the database currently has it.
    pub fn table(&mut self, table: &str) -> Result<Option<TableSpec>> {
        Ok(self.conn.schema_snapshot()?.table(table).cloned())
    }

    /// Changes that would bring the table in line with `desired`.
    ///
    /// `desired` is compared in the engine's canonical form, so details the
    /// engine does not store (such as size classes on SQLite) never show up
    /// as differences.
    pub fn plan(&mut self, desired: &TableSpec) -> Result<Vec<SchemaChange>> {
        let desired = self.conn.extension.normalize_table(desired.clone());
        let Some(current) = self.table(&desired.name)? else {
            return Ok(vec![SchemaChange::CreateTable(desired)]);
        };
        let from = SchemaSnapshot::new().with_table(current);
        let to = SchemaSnapshot::new().with_table(desired);
        Ok(diff(&from, &to, &DiffHints::default())
            .into_iter()
            .map(SchemaChange::from)
            .collect())
    }

    /// Applies [`plan`](Schema::plan) and returns the applied changes.
    pub fn sync(&mut self, desired: &TableSpec) -> Result<Vec<SchemaChange>> {
        let changes = self.plan(desired)?;
        for change in &changes {
            self.conn.apply_change(change)?;
        }
        if !changes.is_empty() {
            info!(table = desired.name, changes = changes.len(), "table synchronized");
        }
        Ok(changes)
    }
}
