//! MySQL and MariaDB extension.
//!
//! MySQL commits implicitly on DDL, so savepoints opened before a schema
//! change are gone by the time they are released; error 1305 on release is
//! taken as that signal and the transaction stack collapses. Keys that must
//! exist together with a column (an auto-increment field needs its primary
//! key) are added in the same `ALTER TABLE`.

use std::sync::LazyLock;

use polysql_core::{
    DefaultValue, DiffOp, FieldInitial, FieldSpec, FieldType, IndexColumn, IndexKind,
    IndexNaming, NewKeys, QuoteStyle, Resolver, SchemaChange, SchemaError, SchemaSnapshot,
    SizeClass, TableSpec,
};
use regex::Regex;
use tracing::debug;

use super::{
    Applied, ConnectionHooks, DebugFlag, Extension, OperatorMapping, Outcome, ReleaseFailure,
    SchemaHooks, StatementHooks, TransactionHooks, column_int, column_text, ddl,
    parse_declared_type,
};
use crate::args::Args;
use crate::client::ExecOutcome;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{DriverError, ErrorKind, Result};
use crate::registry::Engine;
use crate::sequence::SEQUENCES_TABLE;

static RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "analyze", "and", "as", "asc", "before", "between", "bigint", "binary",
    "blob", "both", "by", "call", "cascade", "case", "change", "char", "character", "check",
    "collate", "column", "condition", "constraint", "continue", "convert", "create", "cross",
    "current_date", "current_time", "current_timestamp", "current_user", "database", "databases",
    "decimal", "declare", "default", "delete", "desc", "describe", "distinct", "div", "double",
    "drop", "dual", "each", "else", "elseif", "enclosed", "escaped", "exists", "exit", "explain",
    "false", "fetch", "float", "for", "force", "foreign", "from", "fulltext", "function", "grant",
    "group", "having", "if", "ignore", "in", "index", "inner", "insert", "int", "integer",
    "interval", "into", "is", "join", "key", "keys", "kill", "leading", "leave", "left", "like",
    "limit", "lines", "load", "lock", "long", "loop", "match", "mod", "natural", "not", "null",
    "numeric", "on", "option", "or", "order", "outer", "partition", "precision", "primary",
    "procedure", "range", "read", "real", "references", "regexp", "release", "rename", "repeat",
    "replace", "require", "restrict", "return", "revoke", "right", "rlike", "schema", "select",
    "separator", "set", "show", "signal", "smallint", "spatial", "sql", "ssl", "starting",
    "table", "terminated", "then", "to", "trailing", "trigger", "true", "undo", "union", "unique",
    "unlock", "unsigned", "update", "usage", "use", "using", "values", "varchar", "when", "where",
    "while", "with", "write", "xor",
];

/// Longest utf8mb4 string column InnoDB indexes in full.
pub const MAX_INDEX_PREFIX: u32 = 191;

/// Prefix MariaDB puts in front of its version for old replication clients.
const MARIADB_VERSION_PREFIX: &str = "5.5.5-";

const SQL_MODE: &str = "ANSI_QUOTES,STRICT_ALL_TABLES,ONLY_FULL_GROUP_BY,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION";

/// Extension for MySQL-family servers.
#[derive(Debug, Default)]
pub struct MysqlExtension {
    debug: DebugFlag,
}

impl MysqlExtension {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw_version(conn: &mut Connection) -> Result<String> {
        let rows = conn.query_catalog("SELECT VERSION() AS version", ())?;
        Ok(rows
            .first()
            .map(|row| column_text(row, "version"))
            .unwrap_or_default())
    }

    fn key_clause(names: &mut Resolver, table: &str, name: &str, kind: IndexKind, cols: &[IndexColumn]) -> String {
        let cols = ddl::column_list(names, cols, true);
        match kind {
            IndexKind::Primary => format!("PRIMARY KEY ({cols})"),
            IndexKind::Unique => format!("UNIQUE KEY {} ({cols})", names.index(table, name, kind)),
            IndexKind::Index => format!("INDEX {} ({cols})", names.index(table, name, kind)),
        }
    }

    /// `ADD ...` clauses for `keys`, ready to follow an `ALTER TABLE`.
    fn add_key_clauses(names: &mut Resolver, table: &str, keys: &NewKeys) -> Vec<String> {
        let mut clauses = Vec::new();
        if !keys.primary_key.is_empty() {
            clauses.push(format!(
                "ADD {}",
                Self::key_clause(names, table, "", IndexKind::Primary, &keys.primary_key)
            ));
        }
        for (name, cols) in &keys.unique_keys {
            clauses.push(format!("ADD {}", Self::key_clause(names, table, name, IndexKind::Unique, cols)));
        }
        for (name, cols) in &keys.indexes {
            clauses.push(format!("ADD {}", Self::key_clause(names, table, name, IndexKind::Index, cols)));
        }
        clauses
    }

    /// Key columns of `keys` in the canonical form of table `spec`.
    fn normalize_keys(spec: &TableSpec, keys: &NewKeys) -> NewKeys {
        let mut keys = keys.clone();
        let fix = |cols: &mut Vec<IndexColumn>| {
            for col in cols.iter_mut() {
                if let Some(field) = spec.field(&col.name) {
                    col.length = index_prefix(field, col.length);
                }
            }
        };
        fix(&mut keys.primary_key);
        keys.unique_keys.values_mut().for_each(fix);
        keys.indexes.values_mut().for_each(fix);
        keys
    }

    /// One `ALTER TABLE` adding or changing a field together with its keys.
    fn alter_field_with_keys(
        &self,
        conn: &mut Connection,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        change: &SchemaChange,
    ) -> Result<()> {
        let table = change.table();
        let before = from
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let after = to
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let quoted = conn.names.table(table);
        let (field_clause, final_field, initial, keys) = match change {
            SchemaChange::AddField {
                field,
                keys,
                initial,
                ..
            } => {
                let final_field = after.field(&field.name).unwrap_or(field).clone();
                let mut added = final_field.clone();
                if initial.is_some() {
                    added.not_null = false;
                }
                let clause = format!("ADD {}", self.column_sql(&mut conn.names, &added));
                (clause, final_field, initial.clone(), keys)
            }
            SchemaChange::ChangeField {
                field, spec, keys, ..
            } => {
                let final_field = after.field(&spec.name).unwrap_or(spec).clone();
                let clause = format!(
                    "CHANGE {} {}",
                    conn.names.field(field),
                    self.column_sql(&mut conn.names, &final_field)
                );
                (clause, final_field, None, keys)
            }
            _ => return Ok(()),
        };

        let mut clauses = Vec::new();
        if !keys.primary_key.is_empty() && !before.primary_key.is_empty() {
            clauses.push("DROP PRIMARY KEY".to_string());
        }
        clauses.push(field_clause);
        clauses.extend(Self::add_key_clauses(
            &mut conn.names,
            table,
            &Self::normalize_keys(after, keys),
        ));
        conn.execute_raw(&format!("ALTER TABLE {quoted} {}", clauses.join(", ")))?;

        if let Some(initial) = initial {
            let column = conn.names.field(&final_field.name);
            let value = match initial {
                FieldInitial::Value(value) => value.to_sql_literal(),
                FieldInitial::FromField(other) => conn.names.field(&other),
            };
            conn.execute_raw(&format!("UPDATE {quoted} SET {column} = {value}"))?;
            if final_field.not_null {
                let definition = self.column_sql(&mut conn.names, &final_field);
                conn.execute_raw(&format!("ALTER TABLE {quoted} CHANGE {column} {definition}"))?;
            }
        }
        Ok(())
    }

    fn field_from_catalog(names: &Resolver, row: &polysql_core::Row) -> FieldSpec {
        let name = names.logical_field(&column_text(row, "name"));
        let declared = parse_declared_type(&column_text(row, "type"));
        let extra = column_text(row, "extra").to_ascii_lowercase();
        let size = |size: SizeClass| move |f: FieldSpec| f.size(size);
        let mut field = match declared.name.as_str() {
            "TINYINT" => size(SizeClass::Tiny)(FieldSpec::int(&name)),
            "SMALLINT" => size(SizeClass::Small)(FieldSpec::int(&name)),
            "MEDIUMINT" => size(SizeClass::Medium)(FieldSpec::int(&name)),
            "INT" | "INTEGER" => FieldSpec::int(&name),
            "BIGINT" => size(SizeClass::Big)(FieldSpec::int(&name)),
            "FLOAT" => FieldSpec::float(&name),
            "DOUBLE" | "REAL" => size(SizeClass::Big)(FieldSpec::float(&name)),
            "DECIMAL" | "NUMERIC" => FieldSpec::numeric(
                &name,
                declared.length.unwrap_or(10),
                declared.scale.unwrap_or(0),
            ),
            "VARCHAR" if column_text(row, "charset") == "ascii" => {
                FieldSpec::varchar_ascii(&name, declared.length.unwrap_or(255))
            }
            "VARCHAR" => FieldSpec::varchar(&name, declared.length.unwrap_or(255)),
            "CHAR" => FieldSpec::char(&name, declared.length.unwrap_or(1)),
            "TINYTEXT" => size(SizeClass::Tiny)(FieldSpec::text(&name)),
            "MEDIUMTEXT" => size(SizeClass::Medium)(FieldSpec::text(&name)),
            "TEXT" | "LONGTEXT" => FieldSpec::text(&name),
            "MEDIUMBLOB" => size(SizeClass::Medium)(FieldSpec::blob(&name)),
            "TINYBLOB" | "BLOB" | "LONGBLOB" => FieldSpec::blob(&name),
            _ => FieldSpec::text(&name),
        };
        if extra.contains("auto_increment") {
            field.field_type = FieldType::Serial;
        }
        field.unsigned = declared.rest.contains("UNSIGNED");
        field.not_null = column_text(row, "nullable") == "NO";
        field.default = catalog_default(field.field_type, row.get("dflt"));
        let comment = column_text(row, "comment");
        if !comment.is_empty() {
            field.description = Some(comment);
        }
        field
    }
}

/// Key length for an index column over `field`.
fn index_prefix(field: &FieldSpec, length: Option<u32>) -> Option<u32> {
    let long = match field.field_type {
        FieldType::Text | FieldType::Blob => true,
        FieldType::Varchar | FieldType::Char => field.length.is_none_or(|l| l > MAX_INDEX_PREFIX),
        _ => false,
    };
    match length {
        Some(len) if len > MAX_INDEX_PREFIX => Some(MAX_INDEX_PREFIX),
        None if long => Some(MAX_INDEX_PREFIX),
        other => other,
    }
}

/// Column default as reported by `information_schema`: MariaDB quotes
/// string literals and reports `NULL` as text, MySQL does neither.
fn catalog_default(field_type: FieldType, value: Option<&polysql_core::Value>) -> Option<DefaultValue> {
    let raw = match value {
        None | Some(polysql_core::Value::Null) => return None,
        Some(polysql_core::Value::Integer(i)) => return Some(DefaultValue::Integer(*i)),
        Some(polysql_core::Value::Float(f)) => return Some(DefaultValue::Float(*f)),
        Some(value) => value.as_str().map(str::to_string).unwrap_or_default(),
    };
    if raw == "NULL" || field_type == FieldType::Serial {
        return None;
    }
    if raw.starts_with('\'') || !field_type.is_string() {
        return DefaultValue::from_sql_literal(&raw);
    }
    Some(DefaultValue::Text(raw))
}

impl ConnectionHooks for MysqlExtension {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    fn pre_connection_open(&self, config: &mut ConnectionConfig) {
        config.init_commands.splice(
            0..0,
            [
                "SET NAMES utf8mb4 COLLATE utf8mb4_general_ci".to_string(),
                format!("SET SESSION sql_mode = '{SQL_MODE}'"),
            ],
        );
    }

    fn server_version(&self, conn: &mut Connection) -> Result<String> {
        let version = Self::raw_version(conn)?;
        Ok(version
            .strip_prefix(MARIADB_VERSION_PREFIX)
            .unwrap_or(&version)
            .to_string())
    }

    fn server_platform(&self, conn: &mut Connection, strict: bool) -> Result<String> {
        if !strict {
            return Ok(self.engine().platform().to_string());
        }
        let version = Self::raw_version(conn)?;
        if version.to_ascii_lowercase().contains("mariadb") {
            Ok("mariadb".to_string())
        } else {
            Ok("mysql".to_string())
        }
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::DoubleQuote
    }

    fn index_naming(&self) -> IndexNaming {
        IndexNaming::PerTable
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED_WORDS
    }
}

impl StatementHooks for MysqlExtension {
    fn named_placeholder_support(&self) -> bool {
        false
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn map_condition_operator(&self, operator: &str) -> Option<OperatorMapping> {
        match operator.to_ascii_uppercase().as_str() {
            "ILIKE" => Some(OperatorMapping::new("LIKE")),
            "NOT ILIKE" => Some(OperatorMapping::new("NOT LIKE")),
            _ => None,
        }
    }

    /// Rows matched rather than rows changed, so an UPDATE that sets the
    /// current values still counts its rows.
    fn row_count(&self, outcome: &ExecOutcome) -> u64 {
        static MATCHED_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"Rows matched:\s*(\d+)").expect("static regex must compile")
        });
        outcome
            .info
            .as_deref()
            .and_then(|info| MATCHED_RE.captures(info))
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(outcome.rows_affected)
    }

    fn temporary_table_sql(&self, table: &str, query: &str) -> String {
        format!("CREATE TEMPORARY TABLE {table} ENGINE = MEMORY AS {query}")
    }

    fn translate_error(&self, error: &DriverError) -> ErrorKind {
        match error.code {
            1062 | 1451 | 1452 | 1048 | 1364 => ErrorKind::IntegrityViolation,
            1205 => ErrorKind::LockTimeout,
            1213 => ErrorKind::Deadlock,
            1412 => ErrorKind::SchemaChanged,
            2002 | 2003 | 2006 | 2013 => ErrorKind::ConnectionFailure,
            _ => match error.sqlstate_class() {
                Some("23") => ErrorKind::IntegrityViolation,
                Some("08") => ErrorKind::ConnectionFailure,
                Some("40") => ErrorKind::Deadlock,
                _ => ErrorKind::Driver,
            },
        }
    }

    fn native_upsert_support(&self) -> bool {
        true
    }

    fn upsert_sql(&self, table: &str, key: &str, fields: &[String]) -> Option<String> {
        let placeholders: Vec<String> = (0..fields.len()).map(|i| format!(":p{i}")).collect();
        let mut updates: Vec<String> = fields
            .iter()
            .filter(|f| f.as_str() != key)
            .map(|f| format!("{f} = VALUES({f})"))
            .collect();
        if updates.is_empty() {
            updates.push(format!("{key} = {key}"));
        }
        Some(format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            fields.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        ))
    }
}

impl TransactionHooks for MysqlExtension {
    fn transactional_ddl_support(&self) -> bool {
        false
    }

    fn begin_sql(&self) -> &'static str {
        "START TRANSACTION"
    }

    fn classify_release_failure(&self, error: &DriverError) -> ReleaseFailure {
        // SAVEPOINT does not exist
        if error.code == 1305 {
            ReleaseFailure::CollapseAll
        } else {
            ReleaseFailure::Raise
        }
    }
}

impl SchemaHooks for MysqlExtension {
    fn column_type_sql(&self, field: &FieldSpec) -> String {
        match field.field_type {
            FieldType::Serial | FieldType::Int => match field.size {
                SizeClass::Tiny => "TINYINT",
                SizeClass::Small => "SMALLINT",
                SizeClass::Medium => "MEDIUMINT",
                SizeClass::Normal => "INT",
                SizeClass::Big => "BIGINT",
            }
            .to_string(),
            FieldType::Float => match field.size {
                SizeClass::Big => "DOUBLE",
                _ => "FLOAT",
            }
            .to_string(),
            FieldType::Numeric => format!(
                "DECIMAL({}, {})",
                field.precision.unwrap_or(10),
                field.scale.unwrap_or(0)
            ),
            FieldType::Varchar => format!("VARCHAR({})", field.length.unwrap_or(255)),
            FieldType::VarcharAscii => format!(
                "VARCHAR({}) CHARACTER SET ascii COLLATE ascii_general_ci",
                field.length.unwrap_or(255)
            ),
            FieldType::Char => format!("CHAR({})", field.length.unwrap_or(1)),
            FieldType::Text => match field.size {
                SizeClass::Tiny | SizeClass::Small => "TINYTEXT",
                SizeClass::Medium => "MEDIUMTEXT",
                SizeClass::Normal | SizeClass::Big => "LONGTEXT",
            }
            .to_string(),
            FieldType::Blob => match field.size {
                SizeClass::Medium => "MEDIUMBLOB",
                _ => "LONGBLOB",
            }
            .to_string(),
        }
    }

    fn column_sql(&self, names: &mut Resolver, field: &FieldSpec) -> String {
        let mut sql = format!("{} {}", names.field(&field.name), self.column_type_sql(field));
        if field.unsigned || field.field_type == FieldType::Serial {
            sql.push_str(" UNSIGNED");
        }
        if field.not_null || field.field_type == FieldType::Serial {
            sql.push_str(" NOT NULL");
        }
        if field.field_type == FieldType::Serial {
            sql.push_str(" AUTO_INCREMENT");
        } else if !matches!(field.field_type, FieldType::Text | FieldType::Blob) {
            sql.push_str(&ddl::default_clause(field.default.as_ref()));
        }
        if let Some(description) = &field.description {
            sql.push_str(&format!(" COMMENT {}", ddl::string_literal(description)));
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
        if !spec.primary_key.is_empty() {
            defs.push(Self::key_clause(names, &spec.name, "", IndexKind::Primary, &spec.primary_key));
        }
        for (name, cols) in &spec.unique_keys {
            defs.push(Self::key_clause(names, &spec.name, name, IndexKind::Unique, cols));
        }
        for (name, cols) in &spec.indexes {
            defs.push(Self::key_clause(names, &spec.name, name, IndexKind::Index, cols));
        }
        let mut sql = format!(
            "CREATE TABLE {table} (\n  {}\n) ENGINE = InnoDB DEFAULT CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci",
            defs.join(",\n  ")
        );
        if let Some(description) = &spec.description {
            sql.push_str(&format!(" COMMENT {}", ddl::string_literal(description)));
        }
        vec![sql]
    }

    fn normalize_table(&self, mut spec: TableSpec) -> TableSpec {
        for field in &mut spec.fields {
            match field.field_type {
                FieldType::Serial => {
                    field.not_null = true;
                    field.unsigned = true;
                    field.default = None;
                }
                FieldType::Float if field.size != SizeClass::Big => field.size = SizeClass::Normal,
                FieldType::Text => {
                    field.default = None;
                    field.size = match field.size {
                        SizeClass::Tiny | SizeClass::Small => SizeClass::Tiny,
                        SizeClass::Medium => SizeClass::Medium,
                        SizeClass::Normal | SizeClass::Big => SizeClass::Normal,
                    };
                }
                FieldType::Blob => {
                    field.default = None;
                    if field.size != SizeClass::Medium {
                        field.size = SizeClass::Normal;
                    }
                }
                FieldType::Int => {}
                _ => field.size = SizeClass::Normal,
            }
        }
        let keys = NewKeys {
            primary_key: std::mem::take(&mut spec.primary_key),
            unique_keys: std::mem::take(&mut spec.unique_keys),
            indexes: std::mem::take(&mut spec.indexes),
        };
        let keys = Self::normalize_keys(&spec, &keys);
        spec.primary_key = keys.primary_key;
        spec.unique_keys = keys.unique_keys;
        spec.indexes = keys.indexes;
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
            SchemaChange::AddField { keys, field, .. }
                if !keys.is_empty() || field.field_type == FieldType::Serial => {}
            SchemaChange::ChangeField { keys, .. } if !keys.is_empty() => {}
            _ => return Ok(Outcome::NotHandled),
        }
        debug!(change = %change, "altering field together with its keys");
        self.alter_field_with_keys(conn, from, to, change)?;
        Ok(Outcome::Handled(Applied::Synced))
    }

    fn diff_sql(
        &self,
        names: &mut Resolver,
        op: &DiffOp,
        _from: &SchemaSnapshot,
        _to: &SchemaSnapshot,
    ) -> Result<Outcome<Vec<String>>> {
        let sql = match op {
            DiffOp::AlterField { table, from, to } => {
                let quoted = names.table(table);
                let column = names.field(&from.name);
                let mut only_default = from.clone();
                only_default.default = to.default.clone();
                if only_default == *to {
                    match &to.default {
                        Some(default) => format!(
                            "ALTER TABLE {quoted} ALTER COLUMN {column} SET DEFAULT {}",
                            default.to_sql_literal()
                        ),
                        None => format!("ALTER TABLE {quoted} ALTER COLUMN {column} DROP DEFAULT"),
                    }
                } else {
                    format!("ALTER TABLE {quoted} CHANGE {column} {}", self.column_sql(names, to))
                }
            }
            DiffOp::AddPrimaryKey { table, columns } => format!(
                "ALTER TABLE {} ADD {}",
                names.table(table),
                Self::key_clause(names, table, "", IndexKind::Primary, columns)
            ),
            DiffOp::AddUniqueKey {
                table,
                name,
                columns,
            } => format!(
                "ALTER TABLE {} ADD {}",
                names.table(table),
                Self::key_clause(names, table, name, IndexKind::Unique, columns)
            ),
            DiffOp::AddIndex {
                table,
                name,
                columns,
            } => format!(
                "ALTER TABLE {} ADD {}",
                names.table(table),
                Self::key_clause(names, table, name, IndexKind::Index, columns)
            ),
            DiffOp::DropUniqueKey { table, name } => format!(
                "ALTER TABLE {} DROP KEY {}",
                names.table(table),
                names.index(table, name, IndexKind::Unique)
            ),
            DiffOp::DropIndex { table, name } => format!(
                "ALTER TABLE {} DROP INDEX {}",
                names.table(table),
                names.index(table, name, IndexKind::Index)
            ),
            DiffOp::SetTableComment { table, comment } => format!(
                "ALTER TABLE {} COMMENT {}",
                names.table(table),
                ddl::string_literal(comment.as_deref().unwrap_or(""))
            ),
            _ => return Ok(Outcome::NotHandled),
        };
        Ok(Outcome::Handled(vec![sql]))
    }

    fn list_tables(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let rows = conn.query_catalog(
            "SELECT table_name AS name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name",
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
        let mut spec = TableSpec::new(logical);
        let comment = conn
            .query_catalog(
                "SELECT table_comment AS comment FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = :table",
                Args::new().bind("table", physical),
            )?
            .first()
            .map(|row| column_text(row, "comment"))
            .unwrap_or_default();
        if !comment.is_empty() {
            spec.description = Some(comment);
        }

        let columns = conn.query_catalog(
            "SELECT column_name AS name, column_type AS type, is_nullable AS nullable, column_default AS dflt, extra AS extra, character_set_name AS charset, column_comment AS comment FROM information_schema.columns WHERE table_schema = DATABASE() AND table_name = :table ORDER BY ordinal_position",
            Args::new().bind("table", physical),
        )?;
        for row in &columns {
            spec.fields.push(Self::field_from_catalog(&conn.names, row));
        }

        let statistics = conn.query_catalog(
            "SELECT index_name AS name, non_unique AS non_unique, column_name AS column_name, sub_part AS sub_part FROM information_schema.statistics WHERE table_schema = DATABASE() AND table_name = :table ORDER BY index_name, seq_in_index",
            Args::new().bind("table", physical),
        )?;
        for row in &statistics {
            let index = column_text(row, "name");
            let column = IndexColumn {
                name: conn.names.logical_field(&column_text(row, "column_name")),
                length: column_int(row, "sub_part").and_then(|n| u32::try_from(n).ok()),
            };
            let (name, kind) = conn.names.logical_index(logical, &index);
            match kind {
                Some(IndexKind::Primary) => spec.primary_key.push(column),
                _ if column_int(row, "non_unique") == Some(0) => {
                    spec.unique_keys.entry(name).or_default().push(column);
                }
                _ => spec.indexes.entry(name).or_default().push(column),
            }
        }
        Ok(spec)
    }

    fn next_sequence_value(&self, conn: &mut Connection, watermark: i64) -> Result<Outcome<i64>> {
        // CREATE TABLE commits implicitly, so it runs before the transaction.
        conn.ensure_sequences_table()?;
        let table = conn.names.table(SEQUENCES_TABLE);
        let mut txn = conn.start_transaction(None)?;
        txn.execute_raw(&format!("INSERT INTO {table} () VALUES ()"))?;
        let mut id = txn.last_insert_id(None, None)?.unwrap_or(0);
        if watermark >= id {
            id = watermark + 1;
            txn.execute_raw(&format!("INSERT INTO {table} (value) VALUES ({id})"))?;
        }
        txn.execute_raw(&format!("DELETE FROM {table} WHERE value < {id}"))?;
        txn.commit()?;
        Ok(Outcome::Handled(id))
    }
}

impl Extension for MysqlExtension {
    fn debug(&self) -> bool {
        self.debug.get()
    }

    fn set_debug(&self, enabled: bool) {
        self.debug.set(enabled);
    }
}
