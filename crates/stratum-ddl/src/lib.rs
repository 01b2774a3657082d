//! Declarative table definitions for stratum.
//!
//! This crate turns raw `CREATE TABLE IF NOT EXISTS` text into structured
//! column definitions. It is deliberately not a SQL parser: it understands
//! just enough of the column-list grammar to answer "which columns does this
//! source expect, with which type, nullability, default and reference".
//!
//! ```
//! use stratum_ddl::parse_source;
//!
//! let parsed = parse_source(
//!     "core.sql",
//!     "CREATE TABLE IF NOT EXISTS users (id UUID PRIMARY KEY, email TEXT NOT NULL);",
//! );
//! let users = &parsed.tables[0];
//! assert_eq!(users.name, "users");
//! assert!(!users.columns["email"].nullable);
//! ```
//!
//! Anything the parser cannot confidently extract is skipped and reported as
//! a [`ParseWarning`]; parsing itself never fails.

mod default;
mod ident;
mod parse;
mod scan;
mod schema;
mod types;

pub use default::ColumnDefault;
pub use ident::{MAX_IDENTIFIER_LEN, RESERVED_WORDS, is_reserved_word, is_valid_identifier};
pub use parse::{ParseWarning, ParsedSource, parse_source};
pub use scan::{matching_paren, split_top_level, strip_comments};
pub use schema::{ColumnDefinition, ExpectedSchema, ForeignKeyRef, TableSchema};
pub use types::{ColumnType, TypeKind, TypeModifier};


/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// ```
/// use stratum_ddl::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.0.as_ref().replace('\'', "''"))
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// ```
/// use stratum_ddl::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0.as_ref().replace('"', "\"\""))
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so reserved words like `user` or `order` are safe to use
/// as table names. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    Ident(name).to_string()
}
