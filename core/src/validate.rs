//! Table specification validation.
//!
//! Validates structural invariants of table specifications, catching errors
//! such as duplicate fields, keys over unknown columns, missing lengths, and
//! misplaced serial fields before any DDL is generated.
//!
//! # Examples
//!
//! ```
//! use polysql_core::*;
//!
//! let spec = TableSpec::new("users")
//!     .with_field(FieldSpec::serial("uid"))
//!     .with_primary_key(["uid"]);
//! assert!(validate_table(&spec).is_empty());
//!
//! // Invalid: index over a field the table does not have
//! let bad = TableSpec::new("users")
//!     .with_field(FieldSpec::int("uid"))
//!     .with_index("mail", ["mail"]);
//! assert!(!validate_table(&bad).is_empty());
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{FieldSpec, FieldType, IndexColumn, TableSpec};

/// Table specification validation errors.
///
/// Each variant describes a specific structural problem found during
/// validation. The `Display` impl provides a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Table name is empty or contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid table name: '{0}'")]
    InvalidTableName(String),
    /// Table has no fields.
    #[error("table must define at least one field")]
    NoFields,
    /// Field name is empty or contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid field name: '{0}'")]
    InvalidFieldName(String),
    /// Two fields share a name.
    #[error("duplicate field: {0}")]
    DuplicateField(String),
    /// A varchar or char field has no length.
    #[error("field '{0}' requires a length")]
    MissingLength(String),
    /// Numeric field without precision, or scale above precision.
    #[error("field '{0}' has invalid precision/scale")]
    InvalidPrecision(String),
    /// More than one serial field.
    #[error("table has more than one serial field: {0}")]
    MultipleSerial(String),
    /// Serial field missing from the primary key.
    #[error("serial field '{0}' must be part of the primary key")]
    SerialNotInPrimaryKey(String),
    /// A key or index references an unknown field.
    #[error("key '{key}' references unknown field '{field}'")]
    UnknownKeyField { key: String, field: String },
    /// A key or index has no columns.
    #[error("key '{0}' has no columns")]
    EmptyKey(String),
    /// A unique key and an index share a name.
    #[error("duplicate key name: {0}")]
    DuplicateKey(String),
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates a table specification.
///
/// Returns every problem found; an empty list means the specification is
/// usable.
///
/// # Examples
///
/// ```
/// use polysql_core::*;
///
/// let spec = TableSpec::new("t")
///     .with_field(FieldSpec::serial("a"))
///     .with_field(FieldSpec::serial("b"))
///     .with_primary_key(["a", "b"]);
/// let errors = validate_table(&spec);
/// assert!(errors.contains(&ValidationError::MultipleSerial("b".to_string())));
/// ```
pub fn validate_table(spec: &TableSpec) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !is_identifier(&spec.name) {
        errors.push(ValidationError::InvalidTableName(spec.name.clone()));
        return errors;
    }
    if spec.fields.is_empty() {
        errors.push(ValidationError::NoFields);
        return errors;
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut serial: Option<&str> = None;
    for field in &spec.fields {
        errors.extend(validate_field(field));
        if !seen.insert(field.name.as_str()) {
            errors.push(ValidationError::DuplicateField(field.name.clone()));
        }
        if field.field_type == FieldType::Serial {
            if serial.is_some() {
                errors.push(ValidationError::MultipleSerial(field.name.clone()));
            }
            serial = Some(&field.name);
        }
    }

    if let Some(serial) = serial {
        if !spec.primary_key_contains(serial) {
            errors.push(ValidationError::SerialNotInPrimaryKey(serial.to_string()));
        }
    }

    if !spec.primary_key.is_empty() {
        errors.extend(validate_key("primary", &spec.primary_key, &seen));
    }
    for (name, cols) in &spec.unique_keys {
        errors.extend(validate_key(name, cols, &seen));
        if spec.indexes.contains_key(name) {
            errors.push(ValidationError::DuplicateKey(name.clone()));
        }
    }
    for (name, cols) in &spec.indexes {
        errors.extend(validate_key(name, cols, &seen));
    }

    errors
}

/// Validates a single field definition.
pub fn validate_field(field: &FieldSpec) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !is_identifier(&field.name) {
        errors.push(ValidationError::InvalidFieldName(field.name.clone()));
    }
    match field.field_type {
        FieldType::Varchar | FieldType::VarcharAscii | FieldType::Char => {
            if field.length.is_none_or(|l| l == 0) {
                errors.push(ValidationError::MissingLength(field.name.clone()));
            }
        }
        FieldType::Numeric => match (field.precision, field.scale) {
            (Some(p), s) if p > 0 && s.unwrap_or(0) <= p => {}
            _ => errors.push(ValidationError::InvalidPrecision(field.name.clone())),
        },
        _ => {}
    }
    errors
}

fn validate_key(name: &str, cols: &[IndexColumn], fields: &HashSet<&str>) -> Vec<ValidationError> {
    if cols.is_empty() {
        return vec![ValidationError::EmptyKey(name.to_string())];
    }
    cols.iter()
        .filter(|c| !fields.contains(c.name.as_str()))
        .map(|c| ValidationError::UnknownKeyField {
            key: name.to_string(),
            field: c.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSpec {
        TableSpec::new("users")
            .with_field(FieldSpec::serial("uid"))
            .with_field(FieldSpec::varchar("name", 60).not_null().default(""))
            .with_primary_key(["uid"])
            .with_unique_key("name", ["name"])
    }

    #[test]
    fn test_validate_table_accepts_valid_spec() {
        assert!(validate_table(&users()).is_empty());
    }

    #[test]
    fn test_validate_table_rejects_bad_name() {
        let spec = TableSpec::new("bad name").with_field(FieldSpec::int("a"));
        assert_eq!(
            validate_table(&spec),
            vec![ValidationError::InvalidTableName("bad name".to_string())]
        );
    }

    #[test]
    fn test_validate_table_rejects_duplicate_field() {
        let spec = users().with_field(FieldSpec::int("uid"));
        assert!(
            validate_table(&spec).contains(&ValidationError::DuplicateField("uid".to_string()))
        );
    }

    #[test]
    fn test_validate_table_rejects_serial_outside_primary_key() {
        let spec = TableSpec::new("t").with_field(FieldSpec::serial("id"));
        assert_eq!(
            validate_table(&spec),
            vec![ValidationError::SerialNotInPrimaryKey("id".to_string())]
        );
    }

    #[test]
    fn test_validate_table_rejects_unknown_key_field() {
        let spec = users().with_index("mail", ["mail"]);
        assert_eq!(
            validate_table(&spec),
            vec![ValidationError::UnknownKeyField {
                key: "mail".to_string(),
                field: "mail".to_string()
            }]
        );
    }

    #[test]
    fn test_validate_field_lengths_and_precision() {
        let mut varchar = FieldSpec::new("v", FieldType::Varchar);
        assert_eq!(
            validate_field(&varchar),
            vec![ValidationError::MissingLength("v".to_string())]
        );
        varchar.length = Some(10);
        assert!(validate_field(&varchar).is_empty());

        let numeric = FieldSpec::numeric("n", 4, 6);
        assert_eq!(
            validate_field(&numeric),
            vec![ValidationError::InvalidPrecision("n".to_string())]
        );
    }
}
