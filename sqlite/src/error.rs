//! Mapping of `rusqlite` failures onto the driver boundary error.
//!
//! SQLite failures keep their extended result code, whose low byte is the
//! primary code the extension classifies on. Failures raised by `rusqlite`
//! itself (bad parameter names, conversion errors) carry `SQLITE_MISUSE`.

use polysql_db::DriverError;

/// `SQLITE_MISUSE`.
pub(crate) const MISUSE: i64 = 21;

/// `SQLITE_RANGE`, reported for parameters the statement does not have.
pub(crate) const RANGE: i64 = 25;

/// Converts a `rusqlite` error into a [`DriverError`].
pub(crate) fn driver_error(err: rusqlite::Error) -> DriverError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => DriverError::new(
            i64::from(failure.extended_code),
            message.clone().unwrap_or_else(|| failure.to_string()),
        ),
        rusqlite::Error::InvalidParameterName(name) => {
            DriverError::new(RANGE, format!("unknown parameter {name}"))
        }
        other => DriverError::new(MISUSE, other.to_string()),
    }
}
