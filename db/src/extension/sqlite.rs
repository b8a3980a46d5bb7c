//! SQLite extension.
//!
//! SQLite cannot alter columns in place, so most field and key changes go
//! through a table rebuild: the target table is created under a temporary
//! name, rows are copied column by column, row counts are compared, and
//! only then is the old table dropped and the new one renamed into place.
//! The whole rebuild runs in one transaction layer.

use std::sync::OnceLock;

use polysql_core::identifier::quote;
use polysql_core::{
    DefaultValue, DiffHints, DiffOp, FieldInitial, FieldSpec, FieldType, IndexColumn, IndexKind,
    QuoteStyle, Resolver, SchemaChange, SchemaError, SchemaSnapshot, SizeClass, TableSpec,
};
use tracing::{debug, info, warn};

use super::{
    Applied, ConnectionHooks, DebugFlag, Extension, OperatorMapping, Outcome, SchemaHooks,
    StatementHooks, TransactionHooks, column_int, column_text, ddl, parse_declared_type,
};
use crate::args::Args;
use crate::connection::Connection;
use crate::error::{DbError, DriverError, ErrorKind, Result};
use crate::registry::Engine;

static RESERVED_WORDS: &[&str] = &[
    "abort", "action", "add", "all", "alter", "and", "as", "asc", "between", "by", "case", "check",
    "collate", "column", "commit", "constraint", "create", "cross", "default", "delete", "desc",
    "distinct", "drop", "else", "end", "escape", "except", "exists", "from", "full", "glob",
    "group", "having", "in", "index", "inner", "insert", "intersect", "into", "is", "join", "key",
    "left", "like", "limit", "match", "natural", "not", "null", "offset", "on", "or", "order",
    "outer", "primary", "references", "regexp", "right", "rollback", "select", "set", "table",
    "then", "to", "transaction", "union", "unique", "update", "using", "values", "when", "where",
];

/// First version with `INSERT ... ON CONFLICT DO UPDATE`.
const UPSERT_VERSION: (u32, u32, u32) = (3, 24, 0);

/// Extension for SQLite databases.
#[derive(Debug)]
pub struct SqliteExtension {
    debug: DebugFlag,
    version: OnceLock<String>,
    allow_native_upsert: bool,
}

impl Default for SqliteExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteExtension {
    pub fn new() -> Self {
        Self {
            debug: DebugFlag::default(),
            version: OnceLock::new(),
            allow_native_upsert: true,
        }
    }

    /// Always emulate upserts, whatever the library version.
    pub fn without_native_upsert() -> Self {
        Self {
            allow_native_upsert: false,
            ..Self::new()
        }
    }

    fn version_tuple(&self) -> Option<(u32, u32, u32)> {
        let version = self.version.get()?;
        let mut parts = version.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
        Some((
            parts.next()?,
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        ))
    }

    fn create_unique_index(
        names: &mut Resolver,
        table: &str,
        name: &str,
        cols: &[IndexColumn],
    ) -> String {
        format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            names.index(table, name, IndexKind::Unique),
            names.table(table),
            ddl::column_list(names, cols, false)
        )
    }

    fn index_statements(names: &mut Resolver, spec: &TableSpec) -> Vec<String> {
        let mut statements = Vec::new();
        for (name, cols) in &spec.unique_keys {
            statements.push(Self::create_unique_index(names, &spec.name, name, cols));
        }
        for (name, cols) in &spec.indexes {
            statements.push(ddl::create_index(names, &spec.name, name, cols));
        }
        statements
    }

    fn physical_table_exists(conn: &mut Connection, physical: &str) -> Result<bool> {
        let rows = conn.query_catalog(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = :name",
            Args::new().bind("name", physical),
        )?;
        Ok(!rows.is_empty())
    }

    fn count_rows(conn: &mut Connection, table: &str) -> Result<i64> {
        let rows = conn.query_catalog(&format!("SELECT COUNT(*) AS n FROM {table}"), ())?;
        Ok(rows
            .first()
            .and_then(|row| column_int(row, "n"))
            .unwrap_or(0))
    }

    /// Whether `change` needs a rebuild instead of plain ALTER TABLE.
    fn needs_rebuild(change: &SchemaChange) -> bool {
        match change {
            SchemaChange::DropField { .. }
            | SchemaChange::ChangeField { .. }
            | SchemaChange::SetFieldDefault { .. }
            | SchemaChange::AddPrimaryKey { .. }
            | SchemaChange::DropPrimaryKey { .. } => true,
            SchemaChange::AddField { field, keys, .. } => {
                field.requires_initial_value()
                    || field.field_type == FieldType::Serial
                    || !keys.primary_key.is_empty()
            }
            _ => false,
        }
    }

    /// Copy expression for `field` of the rebuilt table, or `None` to let
    /// the column take its default.
    fn copy_expression(
        names: &mut Resolver,
        old: &TableSpec,
        hints: &DiffHints,
        field: &FieldSpec,
    ) -> Option<String> {
        let source = hints
            .fields
            .iter()
            .find(|((table, _), new)| *table == old.name && **new == field.name)
            .map(|((_, from), _)| from.as_str())
            .unwrap_or(field.name.as_str());
        if let Some(old_field) = old.field(source) {
            let column = names.field(&old_field.name);
            return Some(match &field.default {
                Some(default) if field.not_null && !old_field.not_null => {
                    format!("COALESCE({column}, {})", default.to_sql_literal())
                }
                _ => column,
            });
        }
        match hints.initial(&old.name, &field.name) {
            Some(FieldInitial::Value(value)) => Some(value.to_sql_literal()),
            Some(FieldInitial::FromField(other)) => Some(names.field(other)),
            None => field.default.as_ref().map(DefaultValue::to_sql_literal),
        }
    }

    /// Rebuilds `table` into its shape in `to`.
    fn rebuild(
        &self,
        conn: &mut Connection,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        change: &SchemaChange,
    ) -> Result<()> {
        let table = change.table();
        let old = from
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let new = to
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;

        let mut suffix = 0;
        let temp = loop {
            let candidate = format!("{table}__{suffix}");
            let physical = conn.names.physical_table(&candidate);
            if !Self::physical_table_exists(conn, &physical)? {
                break candidate;
            }
            suffix += 1;
        };

        let layer = conn.push_transaction(None)?;
        match self.rebuild_steps(conn, old, new, &temp, &change.hints()) {
            Ok(rows) => {
                conn.pop_transaction(&layer)?;
                info!(table, rows, "table rebuilt");
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = conn.rollback_transaction(&layer) {
                    warn!(table, error = %rollback, "rollback of failed rebuild failed");
                }
                Err(err)
            }
        }
    }

    fn rebuild_steps(
        &self,
        conn: &mut Connection,
        old: &TableSpec,
        new: &TableSpec,
        temp: &str,
        hints: &DiffHints,
    ) -> Result<i64> {
        let mut shell = new.clone();
        shell.name = temp.to_string();
        shell.unique_keys.clear();
        shell.indexes.clear();
        for sql in self.create_table_sql(&mut conn.names, &shell) {
            conn.execute_raw(&sql)?;
        }

        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for field in &new.fields {
            if let Some(expr) = Self::copy_expression(&mut conn.names, old, hints, field) {
                targets.push(conn.names.field(&field.name));
                sources.push(expr);
            }
        }
        let old_table = conn.names.table(&old.name);
        let temp_table = conn.names.table(temp);
        if !targets.is_empty() {
            conn.execute_raw(&format!(
                "INSERT INTO {temp_table} ({}) SELECT {} FROM {old_table}",
                targets.join(", "),
                sources.join(", ")
            ))?;
        }

        let expected = Self::count_rows(conn, &old_table)?;
        let actual = Self::count_rows(conn, &temp_table)?;
        if expected != actual {
            return Err(DbError::RebuildVerification {
                table: old.name.clone(),
                expected,
                actual,
            });
        }

        conn.execute_raw(&format!("DROP TABLE {old_table}"))?;
        let physical = conn.names.physical_table(&new.name);
        conn.execute_raw(&format!(
            "ALTER TABLE {temp_table} RENAME TO {}",
            conn.names.quote(&physical)
        ))?;
        for sql in Self::index_statements(&mut conn.names, new) {
            conn.execute_raw(&sql)?;
        }
        Ok(expected)
    }

    fn field_from_catalog(
        names: &Resolver,
        create_sql: &str,
        name: &str,
        declared: &str,
        not_null: bool,
        default: &str,
        in_primary_key: bool,
    ) -> FieldSpec {
        let parsed = parse_declared_type(declared);
        let upper_sql = create_sql.to_ascii_uppercase();
        let logical = names.logical_field(name);
        if in_primary_key && parsed.name == "INTEGER" && upper_sql.contains("AUTOINCREMENT") {
            return FieldSpec::serial(logical);
        }
        let mut field = match parsed.name.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => FieldSpec::int(&logical),
            "FLOAT" | "REAL" | "DOUBLE" => FieldSpec::float(&logical),
            "NUMERIC" | "DECIMAL" => FieldSpec::numeric(
                &logical,
                parsed.length.unwrap_or(10),
                parsed.scale.unwrap_or(0),
            ),
            "VARCHAR" => FieldSpec::varchar(&logical, parsed.length.unwrap_or(255)),
            "CHAR" => FieldSpec::char(&logical, parsed.length.unwrap_or(1)),
            "BLOB" => FieldSpec::blob(&logical),
            _ => FieldSpec::text(&logical),
        };
        field.not_null = not_null;
        field.default = DefaultValue::from_sql_literal(default);
        let check = |quoted: &str| upper_sql.contains(&format!("CHECK ({} >= 0)", quoted.to_ascii_uppercase()));
        if check(name) || check(&quote(name, QuoteStyle::DoubleQuote)) {
            field.unsigned = true;
        }
        field
    }
}

impl ConnectionHooks for SqliteExtension {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn pre_connection_open(&self, config: &mut crate::config::ConnectionConfig) {
        config.init_commands.splice(
            0..0,
            [
                "PRAGMA foreign_keys = ON".to_string(),
                "PRAGMA busy_timeout = 5000".to_string(),
            ],
        );
    }

    fn post_connection_open(&self, conn: &mut Connection) -> Result<()> {
        let version = self.server_version(conn)?;
        debug!(version = %version, native_upsert = self.native_upsert_support(), "sqlite session ready");
        Ok(())
    }

    fn server_version(&self, conn: &mut Connection) -> Result<String> {
        if let Some(version) = self.version.get() {
            return Ok(version.clone());
        }
        let rows = conn.query_catalog("SELECT sqlite_version() AS version", ())?;
        let version = rows
            .first()
            .map(|row| column_text(row, "version"))
            .unwrap_or_default();
        if !version.is_empty() {
            let _ = self.version.set(version.clone());
        }
        Ok(version)
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED_WORDS
    }
}

impl StatementHooks for SqliteExtension {
    fn map_condition_operator(&self, operator: &str) -> Option<OperatorMapping> {
        let escape = " ESCAPE '\\'";
        match operator.to_ascii_uppercase().as_str() {
            "LIKE" | "ILIKE" => Some(OperatorMapping::new("LIKE").with_postfix(escape)),
            "NOT LIKE" | "NOT ILIKE" => Some(OperatorMapping::new("NOT LIKE").with_postfix(escape)),
            _ => None,
        }
    }

    fn for_update_clause(&self) -> &'static str {
        ""
    }

    fn translate_error(&self, error: &DriverError) -> ErrorKind {
        // extended result codes carry the primary code in the low byte
        match error.code & 0xff {
            19 => ErrorKind::IntegrityViolation,
            5 | 6 => ErrorKind::LockTimeout,
            17 => ErrorKind::SchemaChanged,
            14 | 26 => ErrorKind::ConnectionFailure,
            _ => ErrorKind::Driver,
        }
    }

    fn native_upsert_support(&self) -> bool {
        self.allow_native_upsert && self.version_tuple().is_some_and(|v| v >= UPSERT_VERSION)
    }

    fn upsert_sql(&self, table: &str, key: &str, fields: &[String]) -> Option<String> {
        if !self.native_upsert_support() {
            return None;
        }
        let placeholders: Vec<String> = (0..fields.len()).map(|i| format!(":p{i}")).collect();
        let updates: Vec<String> = fields
            .iter()
            .filter(|f| f.as_str() != key)
            .map(|f| format!("{f} = excluded.{f}"))
            .collect();
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        Some(format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({key}) {action}",
            fields.join(", "),
            placeholders.join(", ")
        ))
    }
}

impl TransactionHooks for SqliteExtension {
    fn begin_sql(&self) -> &'static str {
        "BEGIN IMMEDIATE"
    }
}

impl SchemaHooks for SqliteExtension {
    fn column_type_sql(&self, field: &FieldSpec) -> String {
        match field.field_type {
            FieldType::Serial | FieldType::Int => "INTEGER".to_string(),
            FieldType::Float => "FLOAT".to_string(),
            FieldType::Numeric => format!(
                "NUMERIC({}, {})",
                field.precision.unwrap_or(10),
                field.scale.unwrap_or(0)
            ),
            FieldType::Varchar | FieldType::VarcharAscii => {
                format!("VARCHAR({})", field.length.unwrap_or(255))
            }
            FieldType::Char => format!("CHAR({})", field.length.unwrap_or(1)),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Blob => "BLOB".to_string(),
        }
    }

    fn column_sql(&self, names: &mut Resolver, field: &FieldSpec) -> String {
        let name = names.field(&field.name);
        if field.field_type == FieldType::Serial {
            return format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT");
        }
        let mut sql = format!("{name} {}", self.column_type_sql(field));
        sql.push_str(&ddl::default_clause(field.default.as_ref()));
        if field.not_null {
            sql.push_str(" NOT NULL");
        }
        if field.unsigned {
            sql.push_str(&format!(" CHECK ({name} >= 0)"));
        }
        sql
    }

    fn create_table_sql(&self, names: &mut Resolver, spec: &TableSpec) -> Vec<String> {
        let table = names.table(&spec.name);
        let mut defs: Vec<String> = spec
            .fields
            .iter()
            .map(|f| self.column_sql(names, f))
            .collect();
        if !spec.primary_key.is_empty() && spec.serial_field().is_none() {
            defs.push(format!(
                "PRIMARY KEY ({})",
                ddl::column_list(names, &spec.primary_key, false)
            ));
        }
        let mut statements = vec![format!("CREATE TABLE {table} (\n  {}\n)", defs.join(",\n  "))];
        statements.extend(Self::index_statements(names, spec));
        statements
    }

    fn normalize_table(&self, mut spec: TableSpec) -> TableSpec {
        spec.description = None;
        for field in &mut spec.fields {
            field.size = SizeClass::Normal;
            field.description = None;
            match field.field_type {
                FieldType::VarcharAscii => field.field_type = FieldType::Varchar,
                FieldType::Serial => {
                    field.not_null = true;
                    field.unsigned = true;
                    field.default = None;
                }
                FieldType::Text | FieldType::Blob | FieldType::Float | FieldType::Int => {
                    field.length = None;
                }
                _ => {}
            }
        }
        let strip = |cols: &mut Vec<IndexColumn>| cols.iter_mut().for_each(|c| c.length = None);
        strip(&mut spec.primary_key);
        spec.unique_keys.values_mut().for_each(strip);
        spec.indexes.values_mut().for_each(strip);
        spec
    }

    fn apply_change(
        &self,
        conn: &mut Connection,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        change: &SchemaChange,
    ) -> Result<Outcome<Applied>> {
        match change {
            SchemaChange::SetTableComment { .. } | SchemaChange::SetFieldComment { .. } => {
                return Err(DbError::Unsupported(format!(
                    "{change}: sqlite has no comments"
                )));
            }
            _ if Self::needs_rebuild(change) => {}
            _ => return Ok(Outcome::NotHandled),
        }
        self.rebuild(conn, from, to, change)?;
        Ok(Outcome::Handled(Applied::Synced))
    }

    fn diff_sql(
        &self,
        names: &mut Resolver,
        op: &DiffOp,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
    ) -> Result<Outcome<Vec<String>>> {
        let statements = match op {
            DiffOp::AddUniqueKey {
                table,
                name,
                columns,
            } => vec![Self::create_unique_index(names, table, name, columns)],
            DiffOp::DropUniqueKey { table, name } => {
                vec![format!("DROP INDEX {}", names.index(table, name, IndexKind::Unique))]
            }
            DiffOp::RenameTable { from: old, to: new } => {
                let Some(before) = from.table(old) else {
                    return Ok(Outcome::NotHandled);
                };
                let mut statements = Vec::new();
                for name in before.unique_keys.keys() {
                    statements.push(format!("DROP INDEX {}", names.index(old, name, IndexKind::Unique)));
                }
                for name in before.indexes.keys() {
                    statements.push(format!("DROP INDEX {}", names.index(old, name, IndexKind::Index)));
                }
                let old_table = names.table(old);
                let physical = names.physical_table(new);
                statements.push(format!(
                    "ALTER TABLE {old_table} RENAME TO {}",
                    names.quote(&physical)
                ));
                if let Some(after) = to.table(new) {
                    statements.extend(Self::index_statements(names, after));
                }
                statements
            }
            DiffOp::SetTableComment { .. } => Vec::new(),
            _ => return Ok(Outcome::NotHandled),
        };
        Ok(Outcome::Handled(statements))
    }

    fn list_tables(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let rows = conn.query_catalog(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
            (),
        )?;
        Ok(rows.iter().map(|row| column_text(row, "name")).collect())
    }

    fn introspect_table(
        &self,
        conn: &mut Connection,
        physical: &str,
        logical: &str,
    ) -> Result<TableSpec> {
        let create_sql = conn
            .query_catalog(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = :name",
                Args::new().bind("name", physical),
            )?
            .first()
            .map(|row| column_text(row, "sql"))
            .unwrap_or_default();
        let quoted = quote(physical, QuoteStyle::DoubleQuote);

        let mut spec = TableSpec::new(logical);
        let mut primary_key: Vec<(i64, String)> = Vec::new();
        for row in conn.query_catalog(&format!("PRAGMA table_info({quoted})"), ())? {
            let name = column_text(&row, "name");
            let pk = column_int(&row, "pk").unwrap_or(0);
            let field = Self::field_from_catalog(
                &conn.names,
                &create_sql,
                &name,
                &column_text(&row, "type"),
                column_int(&row, "notnull") == Some(1),
                &column_text(&row, "dflt_value"),
                pk > 0,
            );
            if pk > 0 {
                primary_key.push((pk, field.name.clone()));
            }
            spec.fields.push(field);
        }
        primary_key.sort();
        spec.primary_key = primary_key
            .into_iter()
            .map(|(_, name)| IndexColumn::new(name))
            .collect();

        for row in conn.query_catalog(&format!("PRAGMA index_list({quoted})"), ())? {
            if column_text(&row, "origin") != "c" {
                continue;
            }
            let index = column_text(&row, "name");
            let unique = column_int(&row, "unique") == Some(1);
            let mut cols = Vec::new();
            let info = format!("PRAGMA index_info({})", quote(&index, QuoteStyle::DoubleQuote));
            for col in conn.query_catalog(&info, ())? {
                cols.push(IndexColumn::new(conn.names.logical_field(&column_text(&col, "name"))));
            }
            let (name, kind) = conn.names.logical_index(logical, &index);
            match kind {
                Some(IndexKind::Unique) => {
                    spec.unique_keys.insert(name, cols);
                }
                Some(IndexKind::Index) => {
                    spec.indexes.insert(name, cols);
                }
                _ if unique => {
                    spec.unique_keys.insert(name, cols);
                }
                _ => {
                    spec.indexes.insert(name, cols);
                }
            }
        }
        Ok(spec)
    }

    fn probe_sql(&self, _table: &str) -> Option<String> {
        None
    }
}

impl Extension for SqliteExtension {
    fn debug(&self) -> bool {
        self.debug.get()
    }

    fn set_debug(&self, enabled: bool) {
        self.debug.set(enabled);
    }
}
