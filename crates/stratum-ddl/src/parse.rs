//! `CREATE TABLE` column extraction.

use crate::ident::is_identifier_shape;
use crate::scan::{Token, find_sequence, mask_literals, mask_nested, tokens};
use crate::{
    ColumnDefault, ColumnDefinition, ColumnType, ForeignKeyRef, TableSchema, TypeKind,
    is_valid_identifier, matching_paren, split_top_level, strip_comments,
};
use regex::Regex;
use std::sync::LazyLock;

const NAME: &str = r#"(?:"(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bCREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?({NAME}(?:\s*\.\s*{NAME})?)\s*\("
    ))
    .expect("create table pattern is valid")
});

static REFERENCE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^\s*({NAME}(?:\s*\.\s*{NAME})?)\s*(?:\(\s*({NAME})\s*\))?"
    ))
    .expect("reference pattern is valid")
});

/// Keywords that end a `DEFAULT` expression.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "NULL",
    "UNIQUE",
    "REFERENCES",
    "CHECK",
    "PRIMARY",
    "FOREIGN",
    "CONSTRAINT",
    "GENERATED",
    "COLLATE",
];

/// Something the parser skipped. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseWarning {
    #[error("table `{table}`: skipped column `{column}`: not a valid column name")]
    InvalidColumnName { table: String, column: String },

    #[error("table `{table}`: skipped column `{column}`: unsupported type `{type_text}`")]
    UnsupportedType {
        table: String,
        column: String,
        type_text: String,
    },

    #[error("table `{table}`: no closing parenthesis for the column list")]
    UnterminatedStatement { table: String },

    #[error("skipped table `{table}`: not a valid table name")]
    InvalidTableName { table: String },
}

/// The result of parsing one source.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    /// Source name, as given to [`parse_source`].
    pub source: String,
    /// Tables in the order their statements appear.
    pub tables: Vec<TableSchema>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedSource {
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

/// Extract every `CREATE TABLE` statement's columns from `sql`.
///
/// Other statements (functions, views, indexes, triggers) are ignored, as is
/// anything inside string literals or dollar-quoted bodies.
pub fn parse_source(source: &str, sql: &str) -> ParsedSource {
    let stripped = strip_comments(sql);
    let masked = mask_literals(&stripped);
    let mut parsed = ParsedSource {
        source: source.to_string(),
        ..Default::default()
    };

    for caps in CREATE_TABLE.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(raw_name) = caps.get(1).and_then(|m| stripped.get(m.range())) else {
            continue;
        };
        let table_name = last_identifier(raw_name);
        if !is_identifier_shape(&table_name) {
            parsed.warnings.push(ParseWarning::InvalidTableName {
                table: raw_name.to_string(),
            });
            continue;
        }

        let open = whole.end() - 1;
        let Some(close) = matching_paren(&stripped, open) else {
            parsed
                .warnings
                .push(ParseWarning::UnterminatedStatement { table: table_name });
            continue;
        };

        let mut table = TableSchema::new(table_name);
        for clause in split_top_level(&stripped[open + 1..close], b',') {
            if let Some(column) = parse_clause(&table.name, clause, &mut parsed.warnings) {
                table.insert_first_seen(column);
            }
        }
        parsed.tables.push(table);
    }

    parsed
}

/// Parse one column-list clause. Returns `None` for table-level constraints
/// and for columns that were skipped with a warning.
fn parse_clause(
    table: &str,
    clause: &str,
    warnings: &mut Vec<ParseWarning>,
) -> Option<ColumnDefinition> {
    let masked = mask_nested(clause);
    if is_table_constraint(&masked, &tokens(&masked)) {
        return None;
    }

    let Some((name, name_end)) = leading_identifier(clause) else {
        warnings.push(ParseWarning::InvalidColumnName {
            table: table.to_string(),
            column: clause.split_whitespace().next().unwrap_or(clause).to_string(),
        });
        return None;
    };
    if !is_valid_identifier(&name) {
        warnings.push(ParseWarning::InvalidColumnName {
            table: table.to_string(),
            column: name,
        });
        return None;
    }

    let rest = &clause[name_end..];
    let Some((column_type, consumed)) = ColumnType::resolve(rest) else {
        warnings.push(ParseWarning::UnsupportedType {
            table: table.to_string(),
            column: name,
            type_text: rest.split_whitespace().next().unwrap_or_default().to_string(),
        });
        return None;
    };

    let tail = &rest[consumed..];
    let masked_tail = mask_nested(tail);
    let toks = tokens(&masked_tail);

    let mut column = ColumnDefinition::new(name, column_type);
    column.nullable = find_sequence(&toks, &["NOT", "NULL"]).is_none();
    column.primary_key = find_sequence(&toks, &["PRIMARY", "KEY"]).is_some();
    column.unique = toks.iter().any(|t| t.text == "UNIQUE");
    column.default = default_expression(tail, &toks).and_then(ColumnDefault::normalize);
    column.references = references(tail, &toks);
    Some(column)
}

fn is_table_constraint(masked: &str, toks: &[Token<'_>]) -> bool {
    let Some(first) = toks.first().filter(|t| t.start == 0) else {
        return false;
    };
    match first.text {
        "CONSTRAINT" | "CHECK" | "UNIQUE" | "EXCLUDE" | "LIKE" => true,
        "PRIMARY" | "FOREIGN" => toks.get(1).is_some_and(|t| t.text == "KEY"),
        // `INDEX (cols)` or `INDEX name (cols)`, but not a column named
        // `key` whose type happens to take arguments.
        "INDEX" | "KEY" => {
            let after = masked[first.end..].trim_start();
            if after.starts_with('(') {
                return true;
            }
            match toks.get(1) {
                Some(next) => {
                    masked[next.end..].trim_start().starts_with('(')
                        && TypeKind::from_keyword(next.text).is_none()
                }
                None => false,
            }
        }
        _ => false,
    }
}

/// The column name at the start of a clause, and the byte offset just past it.
///
/// Quoted names keep their case; unquoted names fold to lowercase.
fn leading_identifier(clause: &str) -> Option<(String, usize)> {
    if let Some(rest) = clause.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if chars.peek().map(|(_, c)| *c) == Some('"') {
                    chars.next();
                    name.push('"');
                    continue;
                }
                return Some((name, i + 2));
            }
            name.push(c);
        }
        return None;
    }

    let end = clause
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(clause.len());
    if end == 0 {
        return None;
    }
    Some((clause[..end].to_ascii_lowercase(), end))
}

/// The last dot-separated part of a possibly schema-qualified name, unquoted.
fn last_identifier(name: &str) -> String {
    let part = split_top_level(name, b'.').pop().unwrap_or(name);
    match part
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => part.to_ascii_lowercase(),
    }
}

/// The raw text of a `DEFAULT` expression, up to the next constraint keyword.
fn default_expression<'a>(tail: &'a str, toks: &[Token<'_>]) -> Option<&'a str> {
    let at = toks.iter().position(|t| t.text == "DEFAULT")?;
    let start = toks[at].end;
    let end = toks[at + 1..]
        .iter()
        .enumerate()
        .find(|(offset, t)| {
            DEFAULT_STOP_WORDS.contains(&t.text)
                || (t.text == "NOT" && toks.get(at + 2 + offset).is_some_and(|n| n.text == "NULL"))
        })
        .map(|(_, t)| t.start)
        .unwrap_or(tail.len());
    tail.get(start..end).map(str::trim)
}

fn references(tail: &str, toks: &[Token<'_>]) -> Option<ForeignKeyRef> {
    let at = toks.iter().position(|t| t.text == "REFERENCES")?;
    let target = tail.get(toks[at].end..)?;
    let caps = REFERENCE_TARGET.captures(target)?;
    let table = last_identifier(caps.get(1)?.as_str());
    let column = caps.get(2).map(|c| last_identifier(c.as_str()));
    Some(ForeignKeyRef {
        table,
        column,
        on_delete: referential_action(toks, "DELETE"),
        on_update: referential_action(toks, "UPDATE"),
    })
}

/// The action after `ON DELETE` / `ON UPDATE`: `CASCADE`, `RESTRICT`,
/// `SET NULL`, `SET DEFAULT` or `NO ACTION`.
fn referential_action(toks: &[Token<'_>], event: &str) -> Option<String> {
    let at = find_sequence(toks, &["ON", event])?;
    let first = toks.get(at + 2)?;
    match first.text {
        "SET" | "NO" => {
            let second = toks.get(at + 3)?;
            Some(format!("{} {}", first.text, second.text))
        }
        _ => Some(first.text.to_string()),
    }
}
