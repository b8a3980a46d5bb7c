//! Oracle extension.
//!
//! Oracle caps identifiers at 30 characters, so longer table, column, index
//! and sequence names are shortened by the connection's resolver and mapped
//! back on every fetched row. Serial fields are a sequence plus a BEFORE
//! INSERT trigger. Oracle cannot modify a column between LOB and scalar
//! types or turn a plain column into a serial one in place; those changes
//! go through a temporary column.
//!
//! DDL commits implicitly and savepoints cannot be released, so ORA-01086
//! on a savepoint rollback collapses the transaction stack.

use polysql_core::{
    DefaultValue, DiffOp, FieldSpec, FieldType, IndexColumn, IndexKind, IndexNaming, NewKeys,
    QuoteStyle, Resolver, Row, SchemaChange, SchemaError, SchemaSnapshot, SizeClass, TableSpec,
};
use tracing::debug;

use super::{
    Applied, ConnectionHooks, DebugFlag, Extension, OperatorMapping, Outcome, ReleaseFailure,
    SchemaHooks, StatementHooks, TransactionHooks, column_int, column_text, ddl,
};
use crate::args::Args;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{DriverError, ErrorKind, Result};
use crate::registry::Engine;

static RESERVED_WORDS: &[&str] = &[
    "access", "add", "all", "alter", "and", "any", "as", "asc", "audit", "between", "by", "char",
    "check", "cluster", "column", "comment", "compress", "connect", "create", "current", "date",
    "decimal", "default", "delete", "desc", "distinct", "drop", "else", "exclusive", "exists",
    "file", "float", "for", "from", "grant", "group", "having", "identified", "immediate", "in",
    "increment", "index", "initial", "insert", "integer", "intersect", "into", "is", "level",
    "like", "lock", "long", "maxextents", "minus", "mlslabel", "mode", "modify", "noaudit",
    "nocompress", "not", "nowait", "null", "number", "of", "offline", "on", "online", "option",
    "or", "order", "pctfree", "prior", "public", "raw", "rename", "resource", "revoke", "row",
    "rowid", "rownum", "rows", "select", "session", "set", "share", "size", "smallint", "start",
    "successful", "synonym", "sysdate", "table", "then", "to", "trigger", "uid", "union",
    "unique", "update", "user", "validate", "values", "varchar", "varchar2", "view", "whenever",
    "where", "with",
];

/// Oracle identifier length limit.
pub const IDENTIFIER_LIMIT: usize = 30;

/// Longest VARCHAR2 in characters before falling back to CLOB.
const MAX_VARCHAR: u32 = 4000;

/// Column added by [`range_sql`](StatementHooks::range_sql) and removed from
/// fetched rows.
const ROWNUM_COLUMN: &str = "polysql_rownum";

/// Extension for Oracle Database.
#[derive(Debug, Default)]
pub struct OracleExtension {
    debug: DebugFlag,
}

impl OracleExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quoted name of an object derived from `table` and `field`.
    fn derived(names: &mut Resolver, table: &str, field: &str, suffix: &str) -> String {
        let physical = names.derived(table, field, suffix);
        names.quote(&physical)
    }

    /// `CREATE SEQUENCE` and trigger backing serial `field` of `table`.
    fn serial_sql(names: &mut Resolver, table: &str, field: &str, start: i64) -> Vec<String> {
        let sequence = Self::derived(names, table, field, "seq");
        vec![
            format!("CREATE SEQUENCE {sequence} START WITH {start}"),
            Self::trigger_sql(names, table, field),
        ]
    }

    fn trigger_sql(names: &mut Resolver, table: &str, field: &str) -> String {
        let sequence = Self::derived(names, table, field, "seq");
        let trigger = Self::derived(names, table, field, "trg");
        let column = names.field(field);
        format!(
            "CREATE OR REPLACE TRIGGER {trigger} BEFORE INSERT ON {} FOR EACH ROW WHEN (NEW.{column} IS NULL) BEGIN :NEW.{column} := {sequence}.NEXTVAL; END;",
            names.table(table)
        )
    }

    /// Drops the sequence and trigger of serial `field`.
    fn drop_serial_sql(names: &mut Resolver, table: &str, field: &str) -> Vec<String> {
        let sequence = Self::derived(names, table, field, "seq");
        let trigger = Self::derived(names, table, field, "trg");
        vec![format!("DROP TRIGGER {trigger}"), format!("DROP SEQUENCE {sequence}")]
    }

    fn comment_sql(names: &mut Resolver, table: &str, field: Option<&str>, comment: Option<&str>) -> String {
        let target = match field {
            Some(field) => format!("COLUMN {}.{}", names.table(table), names.field(field)),
            None => format!("TABLE {}", names.table(table)),
        };
        format!("COMMENT ON {target} IS {}", ddl::string_literal(comment.unwrap_or("")))
    }

    /// `ALTER TABLE ... ADD CONSTRAINT` / `CREATE INDEX` for `keys`.
    fn add_keys_sql(&self, names: &mut Resolver, table: &str, keys: &NewKeys) -> Result<Vec<String>> {
        let mut ops = Vec::new();
        if !keys.primary_key.is_empty() {
            ops.push(DiffOp::AddPrimaryKey {
                table: table.to_string(),
                columns: keys.primary_key.clone(),
            });
        }
        for (name, columns) in &keys.unique_keys {
            ops.push(DiffOp::AddUniqueKey {
                table: table.to_string(),
                name: name.clone(),
                columns: columns.clone(),
            });
        }
        for (name, columns) in &keys.indexes {
            ops.push(DiffOp::AddIndex {
                table: table.to_string(),
                name: name.clone(),
                columns: columns.clone(),
            });
        }
        let mut statements = Vec::new();
        for op in &ops {
            statements.extend(ddl::generic_sql(self, names, op)?);
        }
        Ok(statements)
    }

    /// Adds a serial field: the column is filled from its new sequence
    /// before it becomes NOT NULL and gets its keys.
    fn add_serial_field(
        &self,
        conn: &mut Connection,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        table: &str,
        field: &FieldSpec,
        keys: &NewKeys,
    ) -> Result<()> {
        let before = from
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let after = to
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let final_field = after.field(&field.name).unwrap_or(field).clone();
        let quoted = conn.names.table(table);
        let column = conn.names.field(&field.name);
        let sequence = Self::derived(&mut conn.names, table, &field.name, "seq");

        let mut staged = final_field.clone();
        staged.field_type = FieldType::Int;
        staged.not_null = false;
        staged.unsigned = false;
        staged.default = None;
        let mut statements = vec![
            format!("ALTER TABLE {quoted} ADD ({})", self.column_sql(&mut conn.names, &staged)),
            format!("CREATE SEQUENCE {sequence} START WITH 1"),
            format!("UPDATE {quoted} SET {column} = {sequence}.NEXTVAL"),
            format!("ALTER TABLE {quoted} MODIFY ({column} NOT NULL)"),
        ];
        if !keys.primary_key.is_empty() && !before.primary_key.is_empty() {
            statements.push(format!("ALTER TABLE {quoted} DROP PRIMARY KEY"));
        }
        statements.extend(self.add_keys_sql(&mut conn.names, table, keys)?);
        statements.push(Self::trigger_sql(&mut conn.names, table, &field.name));
        for sql in statements {
            conn.execute_raw(&sql)?;
        }
        Ok(())
    }

    /// Replaces a column through a temporary one: add, copy, drop, rename,
    /// then restore nullability, keys and the serial sequence.
    fn swap_column(
        &self,
        conn: &mut Connection,
        from: &SchemaSnapshot,
        to: &SchemaSnapshot,
        table: &str,
        old: &FieldSpec,
        new_name: &str,
        keys: &NewKeys,
    ) -> Result<()> {
        let before = from
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let after = to
            .table(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))?;
        let new = after
            .field(new_name)
            .ok_or_else(|| SchemaError::UnknownField {
                table: table.to_string(),
                field: new_name.to_string(),
            })?
            .clone();
        let quoted = conn.names.table(table);
        let old_column = conn.names.field(&old.name);
        let new_column = conn.names.field(&new.name);
        let temp_name = format!("{}_tmp", new.name);
        let temp_column = conn.names.field(&temp_name);

        let mut staged = new.renamed(temp_name.as_str());
        if staged.field_type == FieldType::Serial {
            staged.field_type = FieldType::Int;
        }
        staged.not_null = false;
        staged.unsigned = false;

        let mut statements = vec![
            format!("ALTER TABLE {quoted} ADD ({})", self.column_sql(&mut conn.names, &staged)),
            format!(
                "UPDATE {quoted} SET {temp_column} = {}",
                convert_expression(old, &new, &old_column)
            ),
        ];
        if old.field_type == FieldType::Serial {
            statements.extend(Self::drop_serial_sql(&mut conn.names, table, &old.name));
        }
        let pk_follows = !keys.primary_key.is_empty() || after.primary_key_contains(&new.name);
        if pk_follows && !before.primary_key.is_empty() && !before.primary_key_contains(&old.name) {
            statements.push(format!("ALTER TABLE {quoted} DROP PRIMARY KEY"));
        }
        statements.push(format!("ALTER TABLE {quoted} DROP COLUMN {old_column} CASCADE CONSTRAINTS"));
        statements.push(format!("ALTER TABLE {quoted} RENAME COLUMN {temp_column} TO {new_column}"));
        if new.not_null || new.field_type == FieldType::Serial {
            statements.push(format!("ALTER TABLE {quoted} MODIFY ({new_column} NOT NULL)"));
        }
        if new.unsigned && new.field_type != FieldType::Serial {
            statements.push(format!("ALTER TABLE {quoted} ADD CHECK ({new_column} >= 0)"));
        }

        // Dropping the old column took every key over it with it.
        let mut restored = NewKeys::default();
        if pk_follows {
            restored.primary_key = after.primary_key.clone();
        }
        for (kind, name) in after.keys_referencing(&new.name) {
            match kind {
                IndexKind::Unique => {
                    restored.unique_keys.insert(name.clone(), after.unique_keys[&name].clone());
                }
                _ => {
                    restored.indexes.insert(name.clone(), after.indexes[&name].clone());
                }
            }
        }
        statements.extend(self.add_keys_sql(&mut conn.names, table, &restored)?);
        if let Some(description) = &new.description {
            statements.push(Self::comment_sql(&mut conn.names, table, Some(&new.name), Some(description)));
        }
        for sql in statements {
            conn.execute_raw(&sql)?;
        }

        if new.field_type == FieldType::Serial {
            let next = conn
                .query_catalog(
                    &format!("SELECT NVL(MAX({new_column}), 0) + 1 AS next FROM {quoted}"),
                    (),
                )?
                .first()
                .and_then(|row| column_int(row, "next"))
                .unwrap_or(1);
            debug!(table, field = new.name, next, "reseeding serial sequence");
            for sql in Self::serial_sql(&mut conn.names, table, &new.name, next) {
                conn.execute_raw(&sql)?;
            }
        }
        Ok(())
    }

    fn field_from_catalog(names: &Resolver, row: &Row) -> FieldSpec {
        let name = names.logical_field(&column_text(row, "name"));
        let precision = column_int(row, "precision");
        let scale = column_int(row, "scale").unwrap_or(0);
        let char_length = column_int(row, "char_length")
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0);
        let sized = |field: FieldSpec, size: SizeClass| field.size(size);
        let mut field = match column_text(row, "type").to_ascii_uppercase().as_str() {
            "NUMBER" if scale == 0 => match precision {
                Some(3) => sized(FieldSpec::int(&name), SizeClass::Tiny),
                Some(5) => sized(FieldSpec::int(&name), SizeClass::Small),
                Some(7) => sized(FieldSpec::int(&name), SizeClass::Medium),
                Some(19) => sized(FieldSpec::int(&name), SizeClass::Big),
                Some(10) | None => FieldSpec::int(&name),
                Some(p) => FieldSpec::numeric(&name, p as u32, 0),
            },
            "NUMBER" => FieldSpec::numeric(&name, precision.unwrap_or(38) as u32, scale as u32),
            "FLOAT" => FieldSpec::float(&name),
            "BINARY_DOUBLE" | "BINARY_FLOAT" => sized(FieldSpec::float(&name), SizeClass::Big),
            "VARCHAR2" | "NVARCHAR2" => FieldSpec::varchar(&name, char_length.unwrap_or(255)),
            "CHAR" | "NCHAR" => FieldSpec::char(&name, char_length.unwrap_or(1)),
            "BLOB" => FieldSpec::blob(&name),
            _ => FieldSpec::text(&name),
        };
        field.not_null = column_text(row, "nullable") == "N";
        field.default = catalog_default(&column_text(row, "dflt"));
        let comment = column_text(row, "comment_text");
        if !comment.is_empty() {
            field.description = Some(comment);
        }
        field
    }
}

/// Expression copying `column` from `old` into a column shaped like `new`.
fn convert_expression(old: &FieldSpec, new: &FieldSpec, column: &str) -> String {
    let lob = |f: &FieldSpec| matches!(f.field_type, FieldType::Text | FieldType::Blob);
    match (lob(old), lob(new)) {
        (true, false) if old.field_type == FieldType::Text => format!(
            "DBMS_LOB.SUBSTR({column}, {}, 1)",
            new.length.unwrap_or(MAX_VARCHAR).min(MAX_VARCHAR)
        ),
        (false, true) if new.field_type == FieldType::Text => format!("TO_CLOB({column})"),
        _ => column.to_string(),
    }
}

/// Whether changing `old` into `new` needs a temporary column.
fn needs_column_swap(old: &FieldSpec, new: &FieldSpec, keys: &NewKeys) -> bool {
    let serial = |f: &FieldSpec| f.field_type == FieldType::Serial;
    let lob = |f: &FieldSpec| matches!(f.field_type, FieldType::Text | FieldType::Blob);
    serial(old) != serial(new) || lob(old) != lob(new) || !keys.primary_key.is_empty()
}

/// Column default as stored in `user_tab_columns.data_default`, which keeps
/// the literal text of the DDL including trailing whitespace.
fn catalog_default(raw: &str) -> Option<DefaultValue> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    DefaultValue::from_sql_literal(raw)
}

impl ConnectionHooks for OracleExtension {
    fn engine(&self) -> Engine {
        Engine::Oracle
    }

    fn pre_connection_open(&self, config: &mut ConnectionConfig) {
        config.init_commands.splice(
            0..0,
            [
                "ALTER SESSION SET NLS_NUMERIC_CHARACTERS = '.,'".to_string(),
                "ALTER SESSION SET NLS_DATE_FORMAT = 'YYYY-MM-DD HH24:MI:SS'".to_string(),
                "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'YYYY-MM-DD HH24:MI:SS.FF'".to_string(),
            ],
        );
    }

    fn server_version(&self, conn: &mut Connection) -> Result<String> {
        let rows = conn.query_catalog(
            "SELECT version FROM product_component_version WHERE product LIKE 'Oracle%' AND ROWNUM = 1",
            (),
        )?;
        Ok(rows
            .first()
            .map(|row| column_text(row, "version"))
            .unwrap_or_default())
    }

    fn identifier_limit(&self) -> Option<usize> {
        Some(IDENTIFIER_LIMIT)
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::DoubleQuote
    }

    fn index_naming(&self) -> IndexNaming {
        IndexNaming::Global
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED_WORDS
    }
}

impl StatementHooks for OracleExtension {
    fn map_condition_operator(&self, operator: &str) -> Option<OperatorMapping> {
        let escape = " ESCAPE '\\'";
        match operator.to_ascii_uppercase().as_str() {
            "LIKE" => Some(OperatorMapping::new("LIKE").with_postfix(escape)),
            "NOT LIKE" => Some(OperatorMapping::new("NOT LIKE").with_postfix(escape)),
            "ILIKE" => Some(OperatorMapping::new("LIKE").with_wrap("UPPER").with_postfix(escape)),
            "NOT ILIKE" => Some(
                OperatorMapping::new("NOT LIKE")
                    .with_wrap("UPPER")
                    .with_postfix(escape),
            ),
            _ => None,
        }
    }

    /// Lower-cases the upper-case column names Oracle reports, maps
    /// shortened names back, drops the pagination column and returns
    /// numbers as text.
    fn process_fetched_row(&self, names: &Resolver, row: Row) -> Row {
        let (columns, values) = row.into_parts();
        let mut kept_columns = Vec::with_capacity(columns.len());
        let mut kept_values = Vec::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            let column = column.to_ascii_lowercase();
            if column == ROWNUM_COLUMN {
                continue;
            }
            kept_columns.push(names.logical_field(&column));
            kept_values.push(value.stringify());
        }
        Row::new(kept_columns, kept_values)
    }

    fn range_sql(&self, sql: &str, from: u64, count: u64) -> String {
        format!(
            "SELECT * FROM (SELECT polysql_sub.*, ROWNUM AS {ROWNUM_COLUMN} FROM ({sql}) polysql_sub WHERE ROWNUM <= {}) WHERE {ROWNUM_COLUMN} > {from}",
            from + count
        )
    }

    fn temporary_table_sql(&self, table: &str, query: &str) -> String {
        format!("CREATE GLOBAL TEMPORARY TABLE {table} ON COMMIT PRESERVE ROWS AS {query}")
    }

    fn translate_error(&self, error: &DriverError) -> ErrorKind {
        match error.code {
            1 | 1400 | 1407 | 2290 | 2291 | 2292 => ErrorKind::IntegrityViolation,
            54 | 30006 => ErrorKind::LockTimeout,
            60 => ErrorKind::Deadlock,
            4061 | 4068 => ErrorKind::SchemaChanged,
            1012 | 3113 | 3114 | 3135 | 12170 | 12541 => ErrorKind::ConnectionFailure,
            _ => ErrorKind::Driver,
        }
    }

    /// Reads `CURRVAL` of the serial sequence of `table`.
    fn last_insert_id(
        &self,
        conn: &mut Connection,
        table: Option<&str>,
        field: Option<&str>,
    ) -> Result<Outcome<i64>> {
        let Some(table) = table else {
            return Ok(Outcome::NotHandled);
        };
        let field = match field {
            Some(field) => field.to_string(),
            None => match conn
                .schema_snapshot()?
                .table(table)
                .and_then(TableSpec::serial_field)
            {
                Some(serial) => serial.name.clone(),
                None => return Ok(Outcome::NotHandled),
            },
        };
        let sequence = Self::derived(&mut conn.names, table, &field, "seq");
        let id = conn
            .query_catalog(&format!("SELECT {sequence}.CURRVAL AS id FROM DUAL"), ())?
            .first()
            .and_then(|row| column_int(row, "id"));
        Ok(id.map_or(Outcome::NotHandled, Outcome::Handled))
    }
}

impl TransactionHooks for OracleExtension {
    fn transactional_ddl_support(&self) -> bool {
        false
    }

    fn begin_sql(&self) -> &'static str {
        "SET TRANSACTION READ WRITE"
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn classify_release_failure(&self, error: &DriverError) -> ReleaseFailure {
        // savepoint never established in this session or is invalid
        if error.code == 1086 {
            ReleaseFailure::CollapseAll
        } else {
            ReleaseFailure::Raise
        }
    }
}

impl SchemaHooks for OracleExtension {
    fn column_type_sql(&self, field: &FieldSpec) -> String {
        match field.field_type {
            FieldType::Serial | FieldType::Int => match field.size {
                SizeClass::Tiny => "NUMBER(3)",
                SizeClass::Small => "NUMBER(5)",
                SizeClass::Medium => "NUMBER(7)",
                SizeClass::Normal => "NUMBER(10)",
                SizeClass::Big => "NUMBER(19)",
            }
            .to_string(),
            FieldType::Float => match field.size {
                SizeClass::Big => "BINARY_DOUBLE",
                _ => "FLOAT",
            }
            .to_string(),
            FieldType::Numeric => format!(
                "NUMBER({}, {})",
                field.precision.unwrap_or(10),
                field.scale.unwrap_or(0)
            ),
            FieldType::Varchar | FieldType::VarcharAscii => match field.length {
                Some(len) if len > MAX_VARCHAR => "CLOB".to_string(),
                len => format!("VARCHAR2({} CHAR)", len.unwrap_or(255)),
            },
            FieldType::Char => format!("CHAR({} CHAR)", field.length.unwrap_or(1)),
            FieldType::Text => "CLOB".to_string(),
            FieldType::Blob => "BLOB".to_string(),
        }
    }

    fn column_sql(&self, names: &mut Resolver, field: &FieldSpec) -> String {
        let column = names.field(&field.name);
        let mut sql = format!("{column} {}", self.column_type_sql(field));
        if field.field_type != FieldType::Serial {
            sql.push_str(&ddl::default_clause(field.default.as_ref()));
        }
        if field.not_null || field.field_type == FieldType::Serial {
            sql.push_str(" NOT NULL");
        }
        if field.unsigned && field.field_type != FieldType::Serial {
            sql.push_str(&format!(" CHECK ({column} >= 0)"));
        }
        sql
    }

    fn create_table_sql(&self, names: &mut Resolver, spec: &TableSpec) -> Vec<String> {
        let mut statements = ddl::create_table(self, names, spec);
        if let Some(serial) = spec.serial_field() {
            statements.extend(Self::serial_sql(names, &spec.name, &serial.name, 1));
        }
        if let Some(description) = &spec.description {
            statements.push(Self::comment_sql(names, &spec.name, None, Some(description)));
        }
        for field in &spec.fields {
            if let Some(description) = &field.description {
                statements.push(Self::comment_sql(names, &spec.name, Some(&field.name), Some(description)));
            }
        }
        statements
    }

    fn normalize_table(&self, mut spec: TableSpec) -> TableSpec {
        for field in &mut spec.fields {
            match field.field_type {
                FieldType::Serial => {
                    field.not_null = true;
                    field.unsigned = true;
                    field.default = None;
                }
                FieldType::Int => {}
                FieldType::Float if field.size != SizeClass::Big => field.size = SizeClass::Normal,
                FieldType::VarcharAscii => {
                    field.field_type = FieldType::Varchar;
                    field.size = SizeClass::Normal;
                }
                FieldType::Varchar if field.length.is_some_and(|len| len > MAX_VARCHAR) => {
                    field.field_type = FieldType::Text;
                    field.length = None;
                    field.size = SizeClass::Normal;
                }
                _ => field.size = SizeClass::Normal,
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
            SchemaChange::AddField {
                table, field, keys, ..
            } if field.field_type == FieldType::Serial => {
                debug!(change = %change, "adding serial field through its sequence");
                self.add_serial_field(conn, from, to, table, field, keys)?;
                Ok(Outcome::Handled(Applied::Synced))
            }
            SchemaChange::ChangeField {
                table,
                field,
                spec,
                keys,
            } => {
                let old = from
                    .table(table)
                    .and_then(|t| t.field(field))
                    .ok_or_else(|| SchemaError::UnknownField {
                        table: table.clone(),
                        field: field.clone(),
                    })?;
                if !needs_column_swap(old, spec, keys) {
                    return Ok(Outcome::NotHandled);
                }
                debug!(change = %change, "changing field through a temporary column");
                self.swap_column(conn, from, to, table, old, &spec.name, keys)?;
                Ok(Outcome::Handled(Applied::Synced))
            }
            _ => Ok(Outcome::NotHandled),
        }
    }

    fn diff_sql(
        &self,
        names: &mut Resolver,
        op: &DiffOp,
        from: &SchemaSnapshot,
        _to: &SchemaSnapshot,
    ) -> Result<Outcome<Vec<String>>> {
        let statements = match op {
            DiffOp::RenameTable { from: old, to: new } => {
                let Some(spec) = from.table(old) else {
                    return Ok(Outcome::NotHandled);
                };
                let mut statements = ddl::generic_sql(self, names, op)?;
                let quoted = names.table(new);
                if !spec.primary_key.is_empty() {
                    let before = names.index(old, "", IndexKind::Primary);
                    let after = names.index(new, "", IndexKind::Primary);
                    statements.push(format!("ALTER TABLE {quoted} RENAME CONSTRAINT {before} TO {after}"));
                    statements.push(format!("ALTER INDEX {before} RENAME TO {after}"));
                }
                for name in spec.unique_keys.keys() {
                    let before = names.index(old, name, IndexKind::Unique);
                    let after = names.index(new, name, IndexKind::Unique);
                    statements.push(format!("ALTER TABLE {quoted} RENAME CONSTRAINT {before} TO {after}"));
                    statements.push(format!("ALTER INDEX {before} RENAME TO {after}"));
                }
                for name in spec.indexes.keys() {
                    let before = names.index(old, name, IndexKind::Index);
                    let after = names.index(new, name, IndexKind::Index);
                    statements.push(format!("ALTER INDEX {before} RENAME TO {after}"));
                }
                if let Some(serial) = spec.serial_field() {
                    let before = Self::derived(names, old, &serial.name, "seq");
                    let after = Self::derived(names, new, &serial.name, "seq");
                    let trigger = Self::derived(names, old, &serial.name, "trg");
                    statements.push(format!("RENAME {before} TO {after}"));
                    statements.push(format!("DROP TRIGGER {trigger}"));
                    statements.push(Self::trigger_sql(names, new, &serial.name));
                }
                statements
            }
            DiffOp::DropTable { table } => {
                let mut statements = vec![format!("DROP TABLE {} CASCADE CONSTRAINTS PURGE", names.table(table))];
                if let Some(serial) = from.table(table).and_then(TableSpec::serial_field) {
                    let sequence = Self::derived(names, table, &serial.name, "seq");
                    statements.push(format!("DROP SEQUENCE {sequence}"));
                }
                statements
            }
            DiffOp::DropField { table, field } => {
                let mut statements = vec![format!(
                    "ALTER TABLE {} DROP COLUMN {} CASCADE CONSTRAINTS",
                    names.table(table),
                    names.field(field)
                )];
                let serial = from
                    .table(table)
                    .and_then(|t| t.field(field))
                    .is_some_and(|f| f.field_type == FieldType::Serial);
                if serial {
                    statements.extend(Self::drop_serial_sql(names, table, field));
                }
                statements
            }
            DiffOp::AddField { table, field, .. } => {
                let quoted = names.table(table);
                let mut statements = vec![format!("ALTER TABLE {quoted} ADD ({})", self.column_sql(names, field))];
                if let Some(description) = &field.description {
                    statements.push(Self::comment_sql(names, table, Some(&field.name), Some(description)));
                }
                statements
            }
            DiffOp::AlterField { table, from: old, to: new } => {
                let quoted = names.table(table);
                let mut statements = Vec::new();
                if old.name != new.name {
                    statements.push(format!(
                        "ALTER TABLE {quoted} RENAME COLUMN {} TO {}",
                        names.field(&old.name),
                        names.field(&new.name)
                    ));
                }
                let column = names.field(&new.name);
                let mut clause = String::new();
                if self.column_type_sql(old) != self.column_type_sql(new) {
                    clause.push_str(&format!(" {}", self.column_type_sql(new)));
                }
                if old.default != new.default {
                    match &new.default {
                        Some(default) => clause.push_str(&format!(" DEFAULT {}", default.to_sql_literal())),
                        None => clause.push_str(" DEFAULT NULL"),
                    }
                }
                if old.not_null != new.not_null {
                    clause.push_str(if new.not_null { " NOT NULL" } else { " NULL" });
                }
                if !clause.is_empty() {
                    statements.push(format!("ALTER TABLE {quoted} MODIFY ({column}{clause})"));
                }
                if old.description != new.description {
                    statements.push(Self::comment_sql(names, table, Some(&new.name), new.description.as_deref()));
                }
                statements
            }
            DiffOp::DropUniqueKey { table, name } => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {} DROP INDEX",
                names.table(table),
                names.index(table, name, IndexKind::Unique)
            )],
            _ => return Ok(Outcome::NotHandled),
        };
        Ok(Outcome::Handled(statements))
    }

    fn list_tables(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let rows = conn.query_catalog(
            "SELECT LOWER(table_name) AS name FROM user_tables WHERE temporary = 'N' ORDER BY table_name",
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
                "SELECT comments AS comment_text FROM user_tab_comments WHERE table_name = UPPER(:table)",
                Args::new().bind("table", physical),
            )?
            .first()
            .map(|row| column_text(row, "comment_text"))
            .unwrap_or_default();
        if !comment.is_empty() {
            spec.description = Some(comment);
        }

        let columns = conn.query_catalog(
            "SELECT LOWER(c.column_name) AS name, c.data_type AS type, c.data_precision AS precision, c.data_scale AS scale, c.char_length AS char_length, c.nullable AS nullable, c.data_default AS dflt, m.comments AS comment_text FROM user_tab_columns c LEFT JOIN user_col_comments m ON m.table_name = c.table_name AND m.column_name = c.column_name WHERE c.table_name = UPPER(:table) ORDER BY c.column_id",
            Args::new().bind("table", physical),
        )?;
        for row in &columns {
            spec.fields.push(Self::field_from_catalog(&conn.names, row));
        }

        let triggers: Vec<String> = conn
            .query_catalog(
                "SELECT LOWER(trigger_name) AS name FROM user_triggers WHERE table_name = UPPER(:table)",
                Args::new().bind("table", physical),
            )?
            .iter()
            .map(|row| column_text(row, "name"))
            .collect();
        let checks: Vec<String> = conn
            .query_catalog(
                "SELECT LOWER(search_condition_vc) AS condition_text FROM user_constraints WHERE table_name = UPPER(:table) AND constraint_type = 'C'",
                Args::new().bind("table", physical),
            )?
            .iter()
            .map(|row| column_text(row, "condition_text"))
            .collect();
        for field in &mut spec.fields {
            let trigger = conn.names.derived(logical, &field.name, "trg");
            if triggers.contains(&trigger) {
                field.field_type = FieldType::Serial;
                field.unsigned = true;
                field.default = None;
                continue;
            }
            let column = conn.names.physical_field(&field.name);
            let check = format!("{column} >= 0");
            field.unsigned = checks
                .iter()
                .any(|c| c.replace('"', "").trim() == check);
        }

        let constraints = conn.query_catalog(
            "SELECT LOWER(c.constraint_name) AS name, c.constraint_type AS kind, LOWER(k.column_name) AS column_name FROM user_constraints c JOIN user_cons_columns k ON k.constraint_name = c.constraint_name WHERE c.table_name = UPPER(:table) AND c.constraint_type IN ('P', 'U') ORDER BY c.constraint_name, k.position",
            Args::new().bind("table", physical),
        )?;
        for row in &constraints {
            let column = IndexColumn::new(conn.names.logical_field(&column_text(row, "column_name")));
            if column_text(row, "kind") == "P" {
                spec.primary_key.push(column);
            } else {
                let (name, _) = conn.names.logical_index(logical, &column_text(row, "name"));
                spec.unique_keys.entry(name).or_default().push(column);
            }
        }

        let indexes = conn.query_catalog(
            "SELECT LOWER(i.index_name) AS name, LOWER(k.column_name) AS column_name FROM user_indexes i JOIN user_ind_columns k ON k.index_name = i.index_name WHERE i.table_name = UPPER(:table) AND NOT EXISTS (SELECT 1 FROM user_constraints c WHERE c.index_name = i.index_name) ORDER BY i.index_name, k.column_position",
            Args::new().bind("table", physical),
        )?;
        for row in &indexes {
            let (name, _) = conn.names.logical_index(logical, &column_text(row, "name"));
            let column = IndexColumn::new(conn.names.logical_field(&column_text(row, "column_name")));
            spec.indexes.entry(name).or_default().push(column);
        }
        Ok(spec)
    }

    fn probe_sql(&self, table: &str) -> Option<String> {
        Some(format!("SELECT 1 FROM {table} WHERE ROWNUM = 1"))
    }
}

impl Extension for OracleExtension {
    fn debug(&self) -> bool {
        self.debug.get()
    }

    fn set_debug(&self, enabled: bool) {
        self.debug.set(enabled);
    }
}

#[cfg(test)]
mod tests {
    use polysql_core::Value;

    use super::*;
    use crate::client::ResultSet;
    use crate::error::DbError;
    use crate::testing::ScriptedClient;

    fn node() -> TableSpec {
        TableSpec::new("node")
            .with_field(FieldSpec::serial("nid"))
            .with_field(FieldSpec::varchar("title", 255).not_null().default(""))
            .with_field(FieldSpec::text("body").with_description("Body text"))
            .with_primary_key(["nid"])
            .with_index("title", ["title"])
    }

    fn names() -> Resolver {
        let ext = OracleExtension::new();
        Resolver::new("", QuoteStyle::DoubleQuote)
            .with_limit(ext.identifier_limit())
            .with_index_naming(ext.index_naming())
            .with_reserved_words(ext.reserved_words())
    }

    fn connect(client: &ScriptedClient, tables: Vec<TableSpec>) -> Connection {
        let mut conn =
            Connection::from_client(ConnectionConfig::new("oracle", "site"), client.boxed()).unwrap();
        let ext = OracleExtension::new();
        conn.set_schema_snapshot(tables.into_iter().map(|t| ext.normalize_table(t)).collect());
        client.clear_statements();
        conn
    }

    #[test]
    fn test_session_setup() {
        let client = ScriptedClient::new();
        let _conn = Connection::from_client(ConnectionConfig::new("oci8", "site"), client.boxed()).unwrap();
        let statements = client.statements();
        assert_eq!(statements[0], "ALTER SESSION SET NLS_NUMERIC_CHARACTERS = '.,'");
    }

    #[test]
    fn test_create_table_sql() {
        let ext = OracleExtension::new();
        let spec = ext.normalize_table(node().with_description("Content"));
        assert_eq!(
            ext.create_table_sql(&mut names(), &spec),
            vec![
                "CREATE TABLE node (\n  nid NUMBER(10) NOT NULL,\n  title VARCHAR2(255 CHAR) DEFAULT '' NOT NULL,\n  body CLOB,\n  CONSTRAINT node__pkey PRIMARY KEY (nid)\n)",
                "CREATE INDEX node__title__idx ON node (title)",
                "CREATE SEQUENCE node_nid_seq START WITH 1",
                "CREATE OR REPLACE TRIGGER node_nid_trg BEFORE INSERT ON node FOR EACH ROW WHEN (NEW.nid IS NULL) BEGIN :NEW.nid := node_nid_seq.NEXTVAL; END;",
                "COMMENT ON TABLE node IS 'Content'",
                "COMMENT ON COLUMN node.body IS 'Body text'",
            ]
        );
    }

    #[test]
    fn test_long_names_are_shortened() {
        let ext = OracleExtension::new();
        let mut names = names();
        let spec = TableSpec::new("field_revision_comment_body")
            .with_field(FieldSpec::int("entity_id"))
            .with_index("entity_id", ["entity_id"]);
        let statements = ext.create_table_sql(&mut names, &spec);
        let index = names.physical_index("field_revision_comment_body", "entity_id", IndexKind::Index);
        assert_eq!(index.len(), IDENTIFIER_LIMIT);
        assert!(statements[1].starts_with(&format!("CREATE INDEX {index} ON")));
        assert_eq!(
            names.identifiers().reverse(&index),
            "field_revision_comment_body__entity_id__idx"
        );
    }

    #[test]
    fn test_reserved_words_are_quoted() {
        let ext = OracleExtension::new();
        let mut names = names();
        assert_eq!(ext.column_sql(&mut names, &FieldSpec::int("uid")), "\"uid\" NUMBER(10)");
        assert_eq!(ext.column_sql(&mut names, &FieldSpec::int("level").unsigned()), "\"level\" NUMBER(10) CHECK (\"level\" >= 0)");
    }

    #[test]
    fn test_fetched_rows_are_normalized() {
        let ext = OracleExtension::new();
        let mut names = names();
        let physical = names.physical_field("a_rather_long_column_name_for_oracle");
        let row = Row::new(
            vec!["NID".to_string(), physical.to_ascii_uppercase(), "POLYSQL_ROWNUM".to_string()],
            vec![Value::Integer(7), Value::Float(1.5), Value::Integer(1)],
        );
        let row = ext.process_fetched_row(&names, row);
        assert_eq!(row.get("nid"), Some(&Value::from("7")));
        assert_eq!(row.get("a_rather_long_column_name_for_oracle"), Some(&Value::from("1.5")));
        assert_eq!(row.get(ROWNUM_COLUMN), None);
    }

    #[test]
    fn test_range_sql_uses_rownum() {
        let ext = OracleExtension::new();
        assert_eq!(
            ext.range_sql("SELECT nid FROM node ORDER BY nid", 10, 5),
            "SELECT * FROM (SELECT polysql_sub.*, ROWNUM AS polysql_rownum FROM (SELECT nid FROM node ORDER BY nid) polysql_sub WHERE ROWNUM <= 15) WHERE polysql_rownum > 10"
        );
    }

    #[test]
    fn test_like_operators_escape() {
        let ext = OracleExtension::new();
        let ilike = ext.map_condition_operator("ILIKE").unwrap();
        assert_eq!(ilike.render("title", ":t"), "UPPER(title) LIKE UPPER(:t) ESCAPE '\\'");
        assert!(ext.map_condition_operator("=").is_none());
    }

    #[test]
    fn test_translate_error() {
        let ext = OracleExtension::new();
        assert_eq!(ext.translate_error(&DriverError::new(1, "unique constraint violated")), ErrorKind::IntegrityViolation);
        assert_eq!(ext.translate_error(&DriverError::new(1400, "cannot insert NULL")), ErrorKind::IntegrityViolation);
        assert_eq!(ext.translate_error(&DriverError::new(54, "resource busy")), ErrorKind::LockTimeout);
        assert_eq!(ext.translate_error(&DriverError::new(60, "deadlock detected")), ErrorKind::Deadlock);
        assert_eq!(ext.translate_error(&DriverError::new(3113, "end-of-file on channel")), ErrorKind::ConnectionFailure);
        assert_eq!(ext.translate_error(&DriverError::new(942, "table or view does not exist")), ErrorKind::Driver);
    }

    #[test]
    fn test_savepoints_are_never_released() {
        let ext = OracleExtension::new();
        assert_eq!(ext.release_savepoint_sql("savepoint_1"), None);
        assert_eq!(
            ext.classify_release_failure(&DriverError::new(1086, "savepoint never established")),
            ReleaseFailure::CollapseAll
        );
        assert_eq!(ext.classify_release_failure(&DriverError::new(3113, "eof")), ReleaseFailure::Raise);
    }

    #[test]
    fn test_change_to_serial_goes_through_temporary_column() {
        let client = ScriptedClient::new();
        let table = TableSpec::new("log").with_field(FieldSpec::int("id").not_null());
        let mut conn = connect(&client, vec![table]);
        client.on_query("NVL(MAX", ResultSet::new(["NEXT"], vec![vec![Value::Integer(42)]]));
        conn.schema()
            .change_field("log", "id", FieldSpec::serial("id"), NewKeys::default().primary_key(["id"]))
            .unwrap();
        assert_eq!(
            client.statements(),
            vec![
                "ALTER TABLE log ADD (id_tmp NUMBER(10))",
                "UPDATE log SET id_tmp = id",
                "ALTER TABLE log DROP COLUMN id CASCADE CONSTRAINTS",
                "ALTER TABLE log RENAME COLUMN id_tmp TO id",
                "ALTER TABLE log MODIFY (id NOT NULL)",
                "ALTER TABLE log ADD CONSTRAINT log__pkey PRIMARY KEY (id)",
                "SELECT NVL(MAX(id), 0) + 1 AS next FROM log",
                "CREATE SEQUENCE log_id_seq START WITH 42",
                "CREATE OR REPLACE TRIGGER log_id_trg BEFORE INSERT ON log FOR EACH ROW WHEN (NEW.id IS NULL) BEGIN :NEW.id := log_id_seq.NEXTVAL; END;",
            ]
        );
        let log = conn.schema().table("log").unwrap().unwrap();
        assert_eq!(log.fields[0].field_type, FieldType::Serial);
    }

    #[test]
    fn test_text_to_varchar_truncates_lob() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![node()]);
        conn.schema()
            .change_field("node", "body", FieldSpec::varchar("summary", 600), NewKeys::default())
            .unwrap();
        let statements = client.statements();
        assert_eq!(statements[0], "ALTER TABLE node ADD (summary_tmp VARCHAR2(600 CHAR))");
        assert_eq!(statements[1], "UPDATE node SET summary_tmp = DBMS_LOB.SUBSTR(body, 600, 1)");
        assert_eq!(statements[3], "ALTER TABLE node RENAME COLUMN summary_tmp TO summary");
    }

    #[test]
    fn test_plain_change_uses_modify() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![node()]);
        conn.schema()
            .change_field("node", "title", FieldSpec::varchar("label", 128).not_null().default(""), NewKeys::default())
            .unwrap();
        conn.schema().field_set_default("node", "label", "untitled").unwrap();
        assert_eq!(
            client.statements(),
            vec![
                "ALTER TABLE node RENAME COLUMN title TO label",
                "ALTER TABLE node MODIFY (label VARCHAR2(128 CHAR))",
                "ALTER TABLE node MODIFY (label DEFAULT 'untitled')",
            ]
        );
    }

    #[test]
    fn test_rename_table_renames_dependent_objects() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![node()]);
        conn.schema().rename_table("node", "content").unwrap();
        assert_eq!(
            client.statements(),
            vec![
                "ALTER TABLE node RENAME TO content",
                "ALTER TABLE content RENAME CONSTRAINT node__pkey TO content__pkey",
                "ALTER INDEX node__pkey RENAME TO content__pkey",
                "ALTER INDEX node__title__idx RENAME TO content__title__idx",
                "RENAME node_nid_seq TO content_nid_seq",
                "DROP TRIGGER node_nid_trg",
                "CREATE OR REPLACE TRIGGER content_nid_trg BEFORE INSERT ON content FOR EACH ROW WHEN (NEW.nid IS NULL) BEGIN :NEW.nid := content_nid_seq.NEXTVAL; END;",
            ]
        );
    }

    #[test]
    fn test_drop_table_drops_sequence() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![node()]);
        assert!(conn.schema().drop_table("node").unwrap());
        assert_eq!(
            client.statements(),
            vec!["DROP TABLE node CASCADE CONSTRAINTS PURGE", "DROP SEQUENCE node_nid_seq"]
        );
    }

    #[test]
    fn test_last_insert_id_reads_sequence() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![node()]);
        client.on_query("CURRVAL", ResultSet::new(["ID"], vec![vec![Value::Integer(12)]]));
        assert_eq!(conn.last_insert_id(Some("node"), None).unwrap(), Some(12));
        assert!(client.statements().contains(&"SELECT node_nid_seq.CURRVAL AS id FROM DUAL".to_string()));
    }

    #[test]
    fn test_introspect_table() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![]);
        client.on_query(
            "user_tab_columns",
            ResultSet::new(
                ["NAME", "TYPE", "PRECISION", "SCALE", "CHAR_LENGTH", "NULLABLE", "DFLT", "COMMENT_TEXT"],
                vec![
                    vec!["nid".into(), "NUMBER".into(), 10.into(), 0.into(), 0.into(), "N".into(), Value::Null, Value::Null],
                    vec!["title".into(), "VARCHAR2".into(), Value::Null, Value::Null, 255.into(), "N".into(), "'' ".into(), Value::Null],
                    vec!["weight".into(), "NUMBER".into(), 5.into(), 0.into(), 0.into(), "Y".into(), "0 ".into(), "Sort order".into()],
                ],
            ),
        );
        client.on_query("user_triggers", ResultSet::new(["NAME"], vec![vec!["node_nid_trg".into()]]));
        client.on_query(
            "constraint_type = 'C'",
            ResultSet::new(["CONDITION_TEXT"], vec![vec!["\"weight\" >= 0".into()]]),
        );
        client.on_query(
            "user_cons_columns",
            ResultSet::new(
                ["NAME", "KIND", "COLUMN_NAME"],
                vec![vec!["node__pkey".into(), "P".into(), "nid".into()]],
            ),
        );
        client.on_query(
            "user_ind_columns",
            ResultSet::new(
                ["NAME", "COLUMN_NAME"],
                vec![vec!["node__title__idx".into(), "title".into()]],
            ),
        );
        let ext = OracleExtension::new();
        let spec = ext.introspect_table(&mut conn, "node", "node").unwrap();
        assert_eq!(spec.fields[0].field_type, FieldType::Serial);
        assert_eq!(spec.fields[1].default, Some(DefaultValue::Text(String::new())));
        assert_eq!(spec.fields[2].size, SizeClass::Small);
        assert!(spec.fields[2].unsigned);
        assert_eq!(spec.fields[2].description.as_deref(), Some("Sort order"));
        assert_eq!(spec.primary_key, polysql_core::columns(["nid"]));
        assert_eq!(spec.indexes["title"], polysql_core::columns(["title"]));
        assert_eq!(spec, ext.normalize_table(spec.clone()));
    }

    #[test]
    fn test_missing_table_probe() {
        let client = ScriptedClient::new();
        let mut conn = connect(&client, vec![]);
        client.fail_on("WHERE ROWNUM = 1", DriverError::new(942, "table or view does not exist"));
        assert!(!conn.schema().table_exists("node").unwrap());
        client.fail_on("WHERE ROWNUM = 1", DriverError::new(3113, "end-of-file on communication channel"));
        let err = conn.schema().table_exists("node").unwrap_err();
        assert!(matches!(err, DbError::ConnectionFailure { .. }));
    }
}
