//! Error types and classification for database operations.
//!
//! Every failure reported by the underlying client library arrives as a
//! [`DriverError`] (native code, SQLSTATE, message). The active engine
//! extension classifies it into an [`ErrorKind`]; the connection then either
//! retries internally or wraps it into the matching [`DbError`] variant
//! together with the failing query and its arguments. Raw driver errors are
//! never returned to callers.

use std::fmt;

use polysql_core::{SchemaError, Value};
use thiserror::Error;

/// A raw failure reported by the client library.
///
/// # Examples
///
/// ```
/// use polysql_db::DriverError;
///
/// let err = DriverError::new(1062, "Duplicate entry '1' for key 'PRIMARY'").with_sqlstate("23000");
/// assert_eq!(err.code, 1062);
/// assert_eq!(err.sqlstate.as_deref(), Some("23000"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// Native engine error code.
    pub code: i64,
    /// Five character SQLSTATE, when the driver reports one.
    pub sqlstate: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: None,
            message: message.into(),
        }
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// SQLSTATE class (first two characters).
    pub fn sqlstate_class(&self) -> Option<&str> {
        self.sqlstate.as_deref().and_then(|s| s.get(..2))
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "[{}] ({}) {}", self.code, state, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// The statement and arguments that produced an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    pub query: String,
    pub args: Vec<(String, Value)>,
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)?;
        if !self.args.is_empty() {
            let args = self
                .args
                .iter()
                .map(|(name, value)| format!("{name} => {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "; [{args}]")?;
        }
        Ok(())
    }
}

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unique, primary key, foreign key, NOT NULL or check constraint.
    IntegrityViolation,
    /// Lock wait timeout or busy database. Retried for writes.
    LockTimeout,
    /// Deadlock victim. Retried for writes outside transactions.
    Deadlock,
    /// Prepared statement invalidated by a concurrent schema change.
    /// Re-run once.
    SchemaChanged,
    /// Lost or refused connection.
    ConnectionFailure,
    /// Any other driver error.
    Driver,
    CommitFailure,
    OutOfOrderRollback,
    Unsupported,
    /// Errors that do not come from the database.
    Other,
}

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("integrity constraint violation: {source}: {context}")]
    IntegrityViolation {
        source: DriverError,
        context: Box<QueryContext>,
    },

    #[error("lock wait timeout: {source}: {context}")]
    LockTimeout {
        source: DriverError,
        context: Box<QueryContext>,
    },

    #[error("deadlock detected: {source}: {context}")]
    Deadlock {
        source: DriverError,
        context: Box<QueryContext>,
    },

    #[error("schema changed during execution: {source}: {context}")]
    SchemaChanged {
        source: DriverError,
        context: Box<QueryContext>,
    },

    #[error("connection failure: {source}")]
    ConnectionFailure {
        source: DriverError,
        context: Box<QueryContext>,
    },

    #[error("{source}: {context}")]
    Driver {
        source: DriverError,
        context: Box<QueryContext>,
    },

    /// The final COMMIT failed. The transaction stack is empty afterwards.
    #[error("commit failed: {source}")]
    CommitFailure { source: DriverError },

    /// A rollback discarded savepoints that were still in use, or the
    /// savepoint itself no longer existed.
    #[error("out of order rollback of transaction '{0}'")]
    OutOfOrderRollback(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("transaction name '{0}' is already in use")]
    TransactionNameInUse(String),

    #[error("no active transaction named '{0}'")]
    NoActiveTransaction(String),

    #[error("unknown database driver: {0}")]
    UnknownEngine(String),

    #[error("missing argument for placeholder {0}")]
    MissingArgument(String),

    /// Row counts differ after copying a table during a rebuild. The
    /// original table is left in place.
    #[error("rebuild of table '{table}' copied {actual} of {expected} rows")]
    RebuildVerification {
        table: String,
        expected: i64,
        actual: i64,
    },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DbError {
    /// Wraps a classified driver error with its query context.
    pub fn from_driver(kind: ErrorKind, source: DriverError, context: QueryContext) -> Self {
        let context = Box::new(context);
        match kind {
            ErrorKind::IntegrityViolation => DbError::IntegrityViolation { source, context },
            ErrorKind::LockTimeout => DbError::LockTimeout { source, context },
            ErrorKind::Deadlock => DbError::Deadlock { source, context },
            ErrorKind::SchemaChanged => DbError::SchemaChanged { source, context },
            ErrorKind::ConnectionFailure => DbError::ConnectionFailure { source, context },
            ErrorKind::CommitFailure => DbError::CommitFailure { source },
            _ => DbError::Driver { source, context },
        }
    }

    /// A connection failure that happened outside any statement.
    pub fn connection(source: DriverError) -> Self {
        DbError::ConnectionFailure {
            source,
            context: Box::default(),
        }
    }

    /// The classification of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use polysql_db::{DbError, DriverError, ErrorKind, QueryContext};
    ///
    /// let err = DbError::from_driver(
    ///     ErrorKind::IntegrityViolation,
    ///     DriverError::new(19, "UNIQUE constraint failed: users.name"),
    ///     QueryContext::new("INSERT INTO users (name) VALUES (:name)"),
    /// );
    /// assert_eq!(err.kind(), ErrorKind::IntegrityViolation);
    /// assert!(err.to_string().contains("INSERT INTO users"));
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            DbError::LockTimeout { .. } => ErrorKind::LockTimeout,
            DbError::Deadlock { .. } => ErrorKind::Deadlock,
            DbError::SchemaChanged { .. } => ErrorKind::SchemaChanged,
            DbError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            DbError::Driver { .. } => ErrorKind::Driver,
            DbError::CommitFailure { .. } => ErrorKind::CommitFailure,
            DbError::OutOfOrderRollback(_) => ErrorKind::OutOfOrderRollback,
            DbError::Unsupported(_) => ErrorKind::Unsupported,
            _ => ErrorKind::Other,
        }
    }

    /// The raw driver error behind a driver-derived variant.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            DbError::IntegrityViolation { source, .. }
            | DbError::LockTimeout { source, .. }
            | DbError::Deadlock { source, .. }
            | DbError::SchemaChanged { source, .. }
            | DbError::ConnectionFailure { source, .. }
            | DbError::Driver { source, .. }
            | DbError::CommitFailure { source } => Some(source),
            _ => None,
        }
    }

    /// The failing statement and arguments, when the error came from one.
    pub fn query_context(&self) -> Option<&QueryContext> {
        match self {
            DbError::IntegrityViolation { context, .. }
            | DbError::LockTimeout { context, .. }
            | DbError::Deadlock { context, .. }
            | DbError::SchemaChanged { context, .. }
            | DbError::ConnectionFailure { context, .. }
            | DbError::Driver { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Convenience alias for results with [`DbError`].
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_display_lists_args() {
        let mut context = QueryContext::new("UPDATE t SET a = :a");
        context.args.push((":a".to_string(), Value::from("x")));
        assert_eq!(context.to_string(), "UPDATE t SET a = :a; [:a => 'x']");
    }

    #[test]
    fn test_from_driver_maps_kinds() {
        for kind in [
            ErrorKind::IntegrityViolation,
            ErrorKind::LockTimeout,
            ErrorKind::Deadlock,
            ErrorKind::SchemaChanged,
            ErrorKind::ConnectionFailure,
            ErrorKind::Driver,
            ErrorKind::CommitFailure,
        ] {
            let err = DbError::from_driver(kind, DriverError::new(1, "x"), QueryContext::default());
            assert_eq!(err.kind(), kind);
            assert!(err.driver_error().is_some());
        }
    }

    #[test]
    fn test_sqlstate_class() {
        let err = DriverError::new(1452, "fk").with_sqlstate("23000");
        assert_eq!(err.sqlstate_class(), Some("23"));
        assert_eq!(DriverError::new(1, "x").sqlstate_class(), None);
    }
}
