//! Column default normalization.

use crate::Lit;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("number pattern is valid")
});

/// A normalized `DEFAULT` expression.
///
/// Declared defaults and catalog defaults both go through
/// [`ColumnDefault::normalize`], so `now()`, `CURRENT_TIMESTAMP` and
/// `'x'::text` compare the same way regardless of where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    /// `NOW()` or `CURRENT_TIMESTAMP`
    Now,
    /// `TRUE` / `FALSE`
    Bool(bool),
    /// A numeric literal, kept verbatim.
    Number(String),
    /// A plain string literal, unquoted and unescaped.
    Text(String),
    /// Anything else (function calls, casts of expressions), kept verbatim.
    Expression(String),
}

impl ColumnDefault {
    /// Normalize raw default text. Returns `None` for an empty default or an
    /// explicit `NULL`.
    pub fn normalize(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let lower = raw.to_ascii_lowercase();
        let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
        if compact == "null" || compact.starts_with("null::") {
            return None;
        }
        if matches!(
            compact.as_str(),
            "now()" | "current_timestamp" | "current_timestamp()"
        ) {
            return Some(ColumnDefault::Now);
        }
        match lower.as_str() {
            "true" => return Some(ColumnDefault::Bool(true)),
            "false" => return Some(ColumnDefault::Bool(false)),
            _ => {}
        }
        if let Some(text) = string_literal(raw) {
            return Some(ColumnDefault::Text(text));
        }
        if NUMBER.is_match(raw) {
            return Some(ColumnDefault::Number(raw.to_string()));
        }
        Some(ColumnDefault::Expression(raw.to_string()))
    }

    /// Render for splicing into `ADD COLUMN ... DEFAULT <value>`.
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::Now => f.write_str("NOW()"),
            ColumnDefault::Bool(true) => f.write_str("TRUE"),
            ColumnDefault::Bool(false) => f.write_str("FALSE"),
            ColumnDefault::Number(n) => f.write_str(n),
            ColumnDefault::Text(s) => write!(f, "{}", Lit(s)),
            ColumnDefault::Expression(e) => f.write_str(e),
        }
    }
}

/// If `raw` is a single-quoted literal, optionally followed by a `::type`
/// cast, return its unescaped content.
fn string_literal(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix('\'')?;
    let mut content = String::new();
    let mut chars = rest.char_indices().peekable();
    let end = loop {
        let (i, c) = chars.next()?;
        if c == '\'' {
            if chars.peek().map(|(_, c)| *c) == Some('\'') {
                chars.next();
                content.push('\'');
                continue;
            }
            break i + 1;
        }
        content.push(c);
    };

    let tail = rest[end..].trim();
    if tail.is_empty() || tail.starts_with("::") {
        Some(content)
    } else {
        None
    }
}
