//! Identifier resolution: prefixing, quoting, and length-constrained renaming.
//!
//! Logical names (what callers and table specifications use) map to
//! physical names (what the engine sees) in three steps:
//!
//! 1. Tables get the connection prefix: `physical = prefix + logical`.
//! 2. Names longer than the engine's identifier ceiling are truncated to
//!    `limit - 8` characters and suffixed with an 8 character checksum of the
//!    full name. The substitution is recorded in an [`IdentifierMap`] so
//!    result columns and catalog names can be mapped back.
//! 3. Names are quoted only when they collide with a reserved word or
//!    contain characters outside `[A-Za-z0-9_]`.
//!
//! The pure functions in this module carry no state; [`Resolver`] bundles
//! them with the per-connection prefix, quoting style, and identifier map.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::types::IndexKind;

/// Length of the checksum suffix appended to shortened identifiers.
pub const CHECKSUM_LEN: usize = 8;

/// Identifier quoting convention of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// MySQL-family backticks.
    Backtick,
    /// ANSI double quotes.
    DoubleQuote,
}

impl QuoteStyle {
    fn chars(self) -> (char, char) {
        match self {
            QuoteStyle::Backtick => ('`', '`'),
            QuoteStyle::DoubleQuote => ('"', '"'),
        }
    }
}

/// How index names are scoped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexNaming {
    /// Index names only need to be unique per table (MySQL).
    PerTable,
    /// Index names share one namespace per schema and embed the table name.
    Global,
}

/// Returns the first 8 hex characters of the SHA-256 of `name`.
pub fn checksum(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest
        .iter()
        .take(CHECKSUM_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Shortens `name` to at most `limit` characters.
///
/// Names within the limit are returned unchanged. Longer names keep their
/// first `limit - 8` characters followed by [`checksum`] of the full name.
///
/// # Examples
///
/// ```
/// use polysql_core::identifier::shorten;
///
/// assert_eq!(shorten("users", 30), "users");
/// let long = "field_data_comment_body_revision_field";
/// let short = shorten(long, 30);
/// assert_eq!(short.len(), 30);
/// assert!(short.starts_with("field_data_comment_bod"));
/// assert_eq!(short, shorten(long, 30));
/// ```
pub fn shorten(name: &str, limit: usize) -> String {
    if name.chars().count() <= limit {
        return name.to_string();
    }
    let keep = limit.saturating_sub(CHECKSUM_LEN);
    let head: String = name.chars().take(keep).collect();
    format!("{head}{}", checksum(name))
}

/// Returns `true` when `name` is already wrapped in the style's quotes.
pub fn is_quoted(name: &str, style: QuoteStyle) -> bool {
    let (open, close) = style.chars();
    name.len() >= 2 && name.starts_with(open) && name.ends_with(close)
}

/// Unconditionally quotes `name`, doubling embedded quote characters.
pub fn quote(name: &str, style: QuoteStyle) -> String {
    let (open, close) = style.chars();
    let escaped = name.replace(close, &format!("{close}{close}"));
    format!("{open}{escaped}{close}")
}

/// Removes one level of quoting if present.
pub fn unquote(name: &str, style: QuoteStyle) -> String {
    if !is_quoted(name, style) {
        return name.to_string();
    }
    let (_, close) = style.chars();
    name[1..name.len() - 1].replace(&format!("{close}{close}"), &close.to_string())
}

/// Whether `name` can be used without quotes.
fn is_plain(name: &str, reserved: &[&str]) -> bool {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !reserved.iter().any(|w| w.eq_ignore_ascii_case(name))
}

/// Quotes `name` only when it is a reserved word or contains separators.
///
/// Empty names stay empty and already-quoted names pass through unchanged.
/// Dotted names (`table.column`) are handled one part at a time.
///
/// # Examples
///
/// ```
/// use polysql_core::identifier::{quote_if_needed, QuoteStyle};
///
/// let reserved = ["select", "order"];
/// assert_eq!(quote_if_needed("title", QuoteStyle::Backtick, &reserved), "title");
/// assert_eq!(quote_if_needed("order", QuoteStyle::Backtick, &reserved), "`order`");
/// assert_eq!(quote_if_needed("n.order", QuoteStyle::DoubleQuote, &reserved), "n.\"order\"");
/// assert_eq!(quote_if_needed("`x`", QuoteStyle::Backtick, &reserved), "`x`");
/// assert_eq!(quote_if_needed("", QuoteStyle::Backtick, &reserved), "");
/// ```
pub fn quote_if_needed(name: &str, style: QuoteStyle, reserved: &[&str]) -> String {
    if name.is_empty() || is_quoted(name, style) {
        return name.to_string();
    }
    if name.contains('.') {
        return name
            .split('.')
            .map(|part| quote_if_needed(part, style, reserved))
            .collect::<Vec<_>>()
            .join(".");
    }
    if is_plain(name, reserved) {
        name.to_string()
    } else {
        quote(name, style)
    }
}

/// Strips every character outside `[A-Za-z0-9_.]`.
pub fn escape_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}

/// Strips every character outside `[A-Za-z0-9_]`, for aliases.
pub fn escape_alias(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Escapes LIKE wildcards (`%`, `_`) and the backslash escape character.
///
/// # Examples
///
/// ```
/// use polysql_core::identifier::escape_like;
///
/// assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
/// ```
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Bidirectional map of long identifiers to their shortened forms.
///
/// Names within the ceiling are never recorded; lookups for them are the
/// identity in both directions. Entries live as long as the map.
///
/// # Examples
///
/// ```
/// use polysql_core::identifier::IdentifierMap;
///
/// let mut map = IdentifierMap::with_limit(30);
/// let logical = "cache_field_revision_language_index";
/// let physical = map.resolve(logical);
/// assert!(physical.len() <= 30);
/// assert_eq!(map.reverse(&physical), logical);
/// assert_eq!(map.reverse("short"), "short");
/// ```
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    limit: Option<usize>,
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl IdentifierMap {
    /// A map for engines without an identifier ceiling.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns the physical form of `logical`, recording it when shortened.
    pub fn resolve(&mut self, logical: &str) -> String {
        let Some(limit) = self.limit else {
            return logical.to_string();
        };
        if logical.chars().count() <= limit {
            return logical.to_string();
        }
        if let Some(physical) = self.forward.get(logical) {
            return physical.clone();
        }
        let physical = shorten(logical, limit);
        self.forward.insert(logical.to_string(), physical.clone());
        self.reverse.insert(physical.clone(), logical.to_string());
        physical
    }

    /// Returns the logical name recorded for `physical`, or `physical` itself.
    pub fn reverse(&self, physical: &str) -> String {
        self.reverse
            .get(physical)
            .cloned()
            .unwrap_or_else(|| physical.to_string())
    }

    /// Whether `physical` is a recorded shortened name.
    pub fn is_shortened(&self, physical: &str) -> bool {
        self.reverse.contains_key(physical)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Per-connection identifier resolver.
///
/// Combines the table prefix, the engine's quoting style, reserved words,
/// index naming scope, and the [`IdentifierMap`] for the engine's
/// identifier ceiling.
///
/// # Examples
///
/// ```
/// use polysql_core::identifier::{IndexNaming, QuoteStyle, Resolver};
/// use polysql_core::IndexKind;
///
/// let mut names = Resolver::new("app_", QuoteStyle::DoubleQuote)
///     .with_index_naming(IndexNaming::Global);
///
/// assert_eq!(names.table("users"), "app_users");
/// assert_eq!(names.index("users", "mail", IndexKind::Index), "app_users__mail__idx");
/// assert_eq!(names.logical_table("app_users").as_deref(), Some("users"));
/// assert_eq!(names.logical_table("other").as_deref(), None);
/// assert_eq!(
///     names.prefix_tables("SELECT * FROM {users} u JOIN {roles} r ON r.uid = u.uid"),
///     "SELECT * FROM app_users u JOIN app_roles r ON r.uid = u.uid",
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Resolver {
    prefix: String,
    style: QuoteStyle,
    naming: IndexNaming,
    reserved: &'static [&'static str],
    map: IdentifierMap,
}

impl Resolver {
    pub fn new(prefix: impl Into<String>, style: QuoteStyle) -> Self {
        Self {
            prefix: prefix.into(),
            style,
            naming: IndexNaming::PerTable,
            reserved: &[],
            map: IdentifierMap::unlimited(),
        }
    }

    /// Enables shortening of names longer than `limit`.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.map = match limit {
            Some(limit) => IdentifierMap::with_limit(limit),
            None => IdentifierMap::unlimited(),
        };
        self
    }

    pub fn with_index_naming(mut self, naming: IndexNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_reserved_words(mut self, reserved: &'static [&'static str]) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn style(&self) -> QuoteStyle {
        self.style
    }

    pub fn identifiers(&self) -> &IdentifierMap {
        &self.map
    }

    /// Quotes `name` if it needs it under this resolver's rules.
    pub fn quote(&self, name: &str) -> String {
        quote_if_needed(name, self.style, self.reserved)
    }

    /// Unquoted physical table name.
    pub fn physical_table(&mut self, logical: &str) -> String {
        if logical.is_empty() {
            return String::new();
        }
        if is_quoted(logical, self.style) {
            return logical.to_string();
        }
        self.map.resolve(&format!("{}{}", self.prefix, logical))
    }

    /// Physical table name ready for use in SQL.
    pub fn table(&mut self, logical: &str) -> String {
        let physical = self.physical_table(logical);
        self.quote(&physical)
    }

    /// Unquoted physical field name.
    pub fn physical_field(&mut self, logical: &str) -> String {
        if logical.is_empty() || is_quoted(logical, self.style) {
            return logical.to_string();
        }
        self.map.resolve(logical)
    }

    /// Physical field name ready for use in SQL.
    pub fn field(&mut self, logical: &str) -> String {
        let physical = self.physical_field(logical);
        self.quote(&physical)
    }

    /// Unquoted physical name of an index on `table`.
    ///
    /// Primary keys ignore `name`: they are `PRIMARY` under per-table
    /// naming and `{table}__pkey` under global naming.
    pub fn physical_index(&mut self, table: &str, name: &str, kind: IndexKind) -> String {
        match self.naming {
            IndexNaming::PerTable => match kind {
                IndexKind::Primary => "PRIMARY".to_string(),
                _ => self.map.resolve(name),
            },
            IndexNaming::Global => {
                let full = match kind {
                    IndexKind::Primary => format!("{}{}__pkey", self.prefix, table),
                    _ => format!("{}{}__{}__{}", self.prefix, table, name, kind.suffix()),
                };
                self.map.resolve(&full)
            }
        }
    }

    /// Physical index name ready for use in SQL.
    pub fn index(&mut self, table: &str, name: &str, kind: IndexKind) -> String {
        let physical = self.physical_index(table, name, kind);
        self.quote(&physical)
    }

    /// Name of an engine object derived from a table and field, such as a
    /// sequence or trigger (`{table}_{field}_{suffix}`), shortened if needed.
    pub fn derived(&mut self, table: &str, field: &str, suffix: &str) -> String {
        let full = format!("{}{}_{}_{}", self.prefix, table, field, suffix);
        self.map.resolve(&full)
    }

    /// Maps a physical table name back to its logical name.
    ///
    /// Returns `None` for tables outside this connection's prefix.
    pub fn logical_table(&self, physical: &str) -> Option<String> {
        let full = self.map.reverse(physical);
        full.strip_prefix(self.prefix.as_str()).map(str::to_string)
    }

    /// Maps a physical field or result column name back to its logical name.
    pub fn logical_field(&self, physical: &str) -> String {
        self.map.reverse(physical)
    }

    /// Maps a physical index name back to the logical index name and kind.
    ///
    /// `table` is the logical table the index belongs to.
    pub fn logical_index(&self, table: &str, physical: &str) -> (String, Option<IndexKind>) {
        let full = self.map.reverse(physical);
        match self.naming {
            IndexNaming::PerTable => {
                if full.eq_ignore_ascii_case("PRIMARY") {
                    (full, Some(IndexKind::Primary))
                } else {
                    (full, None)
                }
            }
            IndexNaming::Global => {
                let head = format!("{}{}__", self.prefix, table);
                let Some(rest) = full.strip_prefix(&head) else {
                    return (full, None);
                };
                if rest == IndexKind::Primary.suffix() {
                    return (String::new(), Some(IndexKind::Primary));
                }
                for kind in [IndexKind::Primary, IndexKind::Unique, IndexKind::Index] {
                    let tail = format!("__{}", kind.suffix());
                    if let Some(name) = rest.strip_suffix(&tail) {
                        return (name.to_string(), Some(kind));
                    }
                }
                (rest.to_string(), None)
            }
        }
    }

    /// Replaces `{table}` markers with physical table names.
    ///
    /// Braces whose content is not a plain identifier are left untouched.
    pub fn prefix_tables(&mut self, sql: &str) -> String {
        let mut out = String::with_capacity(sql.len() + 16);
        let mut rest = sql;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close)
                    if close > 0
                        && after[..close]
                            .chars()
                            .all(|c| c.is_ascii_alphanumeric() || c == '_') =>
                {
                    let name = &after[..close];
                    out.push_str(&self.table(name));
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}
