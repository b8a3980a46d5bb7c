//! Error types for schema model operations.

use thiserror::Error;

use crate::validate::ValidationError;

/// Errors raised when a change cannot be applied to a schema model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    #[error("table '{0}' already exists")]
    TableExists(String),

    #[error("field '{table}.{field}' does not exist")]
    UnknownField { table: String, field: String },

    #[error("field '{table}.{field}' already exists")]
    FieldExists { table: String, field: String },

    #[error("index '{name}' does not exist on table '{table}'")]
    UnknownIndex { table: String, name: String },

    #[error("index '{name}' already exists on table '{table}'")]
    IndexExists { table: String, name: String },

    #[error("table '{0}' already has a primary key")]
    PrimaryKeyExists(String),

    #[error("table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("invalid table specification for '{table}': {error}")]
    Invalid {
        table: String,
        error: ValidationError,
    },
}

/// Result type alias for schema model operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
