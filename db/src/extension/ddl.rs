//! Generic DDL generation.
//!
//! Engine-neutral statements for the diff operations an extension does not
//! handle itself. Extensions reuse these helpers for the parts of their
//! dialect that match the generic form.

use polysql_core::{DefaultValue, DiffOp, FieldSpec, IndexColumn, IndexKind, Resolver, TableSpec};

use super::SchemaHooks;
use crate::error::{DbError, Result};

/// `a, b, c` with quoted physical field names. Key lengths are kept only
/// with `with_length`.
pub fn column_list(names: &mut Resolver, cols: &[IndexColumn], with_length: bool) -> String {
    cols.iter()
        .map(|c| {
            let name = names.field(&c.name);
            match c.length {
                Some(len) if with_length => format!("{name}({len})"),
                _ => name,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// SQL string literal.
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// ` DEFAULT <literal>` or an empty string.
pub fn default_clause(default: Option<&DefaultValue>) -> String {
    default
        .map(|d| format!(" DEFAULT {}", d.to_sql_literal()))
        .unwrap_or_default()
}

/// `name TYPE [DEFAULT x] [NOT NULL]`.
pub fn column_definition<E: SchemaHooks + ?Sized>(
    ext: &E,
    names: &mut Resolver,
    field: &FieldSpec,
) -> String {
    let mut sql = format!("{} {}", names.field(&field.name), ext.column_type_sql(field));
    sql.push_str(&default_clause(field.default.as_ref()));
    if field.not_null {
        sql.push_str(" NOT NULL");
    }
    sql
}

/// `CREATE TABLE` with inline primary key and unique constraints, followed
/// by one `CREATE INDEX` per plain index.
pub fn create_table<E: SchemaHooks + ?Sized>(
    ext: &E,
    names: &mut Resolver,
    spec: &TableSpec,
) -> Vec<String> {
    let table = names.table(&spec.name);
    let mut defs: Vec<String> = spec
        .fields
        .iter()
        .map(|f| ext.column_sql(names, f))
        .collect();
    if !spec.primary_key.is_empty() {
        defs.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            names.index(&spec.name, "", IndexKind::Primary),
            column_list(names, &spec.primary_key, false)
        ));
    }
    for (name, cols) in &spec.unique_keys {
        defs.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            names.index(&spec.name, name, IndexKind::Unique),
            column_list(names, cols, false)
        ));
    }
    let mut statements = vec![format!("CREATE TABLE {table} (\n  {}\n)", defs.join(",\n  "))];
    for (name, cols) in &spec.indexes {
        statements.push(create_index(names, &spec.name, name, cols));
    }
    statements
}

/// `CREATE INDEX name ON table (cols)`.
pub fn create_index(names: &mut Resolver, table: &str, name: &str, cols: &[IndexColumn]) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        names.index(table, name, IndexKind::Index),
        names.table(table),
        column_list(names, cols, false)
    )
}

/// Generic statements for one diff operation.
///
/// # Errors
///
/// Returns [`Unsupported`](DbError::Unsupported) for field alterations,
/// which have no portable form.
pub fn generic_sql<E: SchemaHooks + ?Sized>(
    ext: &E,
    names: &mut Resolver,
    op: &DiffOp,
) -> Result<Vec<String>> {
    let sql = match op {
        DiffOp::CreateTable(spec) => return Ok(ext.create_table_sql(names, spec)),
        DiffOp::RenameTable { from, to } => {
            let from = names.table(from);
            let to = names.physical_table(to);
            format!("ALTER TABLE {from} RENAME TO {}", names.quote(&to))
        }
        DiffOp::DropTable { table } => format!("DROP TABLE {}", names.table(table)),
        DiffOp::DropPrimaryKey { table } => {
            format!("ALTER TABLE {} DROP PRIMARY KEY", names.table(table))
        }
        DiffOp::DropUniqueKey { table, name } => format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            names.table(table),
            names.index(table, name, IndexKind::Unique)
        ),
        DiffOp::DropIndex { table, name } => {
            format!("DROP INDEX {}", names.index(table, name, IndexKind::Index))
        }
        DiffOp::DropField { table, field } => format!(
            "ALTER TABLE {} DROP COLUMN {}",
            names.table(table),
            names.field(field)
        ),
        DiffOp::AlterField { table, to, .. } => {
            return Err(DbError::Unsupported(format!(
                "altering field {table}.{} has no generic form",
                to.name
            )));
        }
        DiffOp::AddField { table, field, .. } => {
            let table = names.table(table);
            format!("ALTER TABLE {table} ADD {}", ext.column_sql(names, field))
        }
        DiffOp::AddPrimaryKey { table, columns } => format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
            names.table(table),
            names.index(table, "", IndexKind::Primary),
            column_list(names, columns, false)
        ),
        DiffOp::AddUniqueKey {
            table,
            name,
            columns,
        } => format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            names.table(table),
            names.index(table, name, IndexKind::Unique),
            column_list(names, columns, false)
        ),
        DiffOp::AddIndex {
            table,
            name,
            columns,
        } => create_index(names, table, name, columns),
        DiffOp::SetTableComment { table, comment } => format!(
            "COMMENT ON TABLE {} IS {}",
            names.table(table),
            string_literal(comment.as_deref().unwrap_or(""))
        ),
    };
    Ok(vec![sql])
}

#[cfg(test)]
mod tests {
    use polysql_core::{FieldType, IndexNaming, QuoteStyle};

    use super::*;
    use crate::extension::SqliteExtension;

    fn names() -> Resolver {
        Resolver::new("p_", QuoteStyle::DoubleQuote).with_index_naming(IndexNaming::Global)
    }

    #[test]
    fn test_column_list_lengths() {
        let mut names = names();
        let cols = vec![IndexColumn::new("a"), IndexColumn::prefixed("b", 10)];
        assert_eq!(column_list(&mut names, &cols, true), "a, b(10)");
        assert_eq!(column_list(&mut names, &cols, false), "a, b");
    }

    #[test]
    fn test_string_literal_escapes_quotes() {
        assert_eq!(string_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_generic_index_statements() {
        let ext = SqliteExtension::new();
        let mut names = names();
        let add = generic_sql(
            &ext,
            &mut names,
            &DiffOp::AddIndex {
                table: "node".into(),
                name: "title".into(),
                columns: polysql_core::columns(["title"]),
            },
        )
        .unwrap();
        assert_eq!(add, vec!["CREATE INDEX p_node__title__idx ON p_node (title)"]);

        let drop = generic_sql(
            &ext,
            &mut names,
            &DiffOp::DropIndex {
                table: "node".into(),
                name: "title".into(),
            },
        )
        .unwrap();
        assert_eq!(drop, vec!["DROP INDEX p_node__title__idx"]);
    }

    #[test]
    fn test_generic_alter_field_is_unsupported() {
        let ext = SqliteExtension::new();
        let field = FieldSpec::new("a", FieldType::Int);
        let err = generic_sql(
            &ext,
            &mut names(),
            &DiffOp::AlterField {
                table: "t".into(),
                from: field.clone(),
                to: field,
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::Unsupported(_)));
    }
}
