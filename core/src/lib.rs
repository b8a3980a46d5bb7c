//! Engine-neutral schema model for the polysql portability layer.
//!
//! This crate holds everything that can be decided without talking to a
//! database:
//!
//! - [`TableSpec`] and [`FieldSpec`]: caller-supplied table specifications
//!   with semantic field types, size classes, defaults, and keys.
//! - [`SchemaChange`]: one structural operation (create table, change
//!   field, add index, ...).
//! - [`SchemaSnapshot`]: an immutable model of a database's tables.
//!   [`SchemaSnapshot::apply`] returns a new snapshot with a change applied.
//! - [`diff`]: the pure, ordered list of [`DiffOp`]s between two snapshots.
//! - [`identifier`]: prefixing, quoting, and checksum shortening of names for
//!   engines with an identifier length ceiling.
//! - [`Value`] and [`Row`]: scalars exchanged with the database.
//!
//! Validation ([`validate_table`]) catches structural errors such as
//! duplicate fields, keys over unknown fields, and serial fields outside the
//! primary key.
//!
//! # Example
//!
//! ```
//! use polysql_core::*;
//!
//! let users = TableSpec::new("users")
//!     .with_field(FieldSpec::serial("uid"))
//!     .with_field(FieldSpec::varchar("name", 32))
//!     .with_primary_key(["uid"]);
//! assert!(validate_table(&users).is_empty());
//!
//! let from = SchemaSnapshot::new().with_table(users);
//! let change = SchemaChange::ChangeField {
//!     table: "users".into(),
//!     field: "name".into(),
//!     spec: FieldSpec::varchar("name", 64).not_null().default(""),
//!     keys: NewKeys::default(),
//! };
//! let to = from.apply(&change).unwrap();
//!
//! let ops = diff(&from, &to, &change.hints());
//! assert_eq!(ops.len(), 1);
//! assert!(diff(&to, &to, &DiffHints::default()).is_empty());
//! ```

mod change;
mod diff;
mod error;
pub mod identifier;
mod snapshot;
mod types;
mod validate;
mod value;

pub use change::{DiffHints, FieldInitial, NewKeys, SchemaChange};
pub use diff::{DiffOp, diff};
pub use error::{Result, SchemaError};
pub use identifier::{IdentifierMap, IndexNaming, QuoteStyle, Resolver};
pub use snapshot::SchemaSnapshot;
pub use types::*;
pub use validate::{ValidationError, validate_field, validate_table};
pub use value::{Row, Value};
