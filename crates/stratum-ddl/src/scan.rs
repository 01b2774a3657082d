//! Quote-aware scanning over raw SQL text.
//!
//! Everything here works on byte offsets. Offsets handed out always sit on an
//! ASCII delimiter (a quote, a parenthesis, a comma), so slicing the original
//! `&str` with them is safe.

/// If a quoted region starts at `i`, returns the offset just past its end.
///
/// Handles `'string'` and `"identifier"` (with doubled-quote escapes) and
/// dollar-quoted bodies (`$$ ... $$`, `$fn$ ... $fn$`). An unterminated region
/// runs to the end of the input.
fn quoted_end(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        quote @ (b'\'' | b'"') => {
            let mut j = i + 1;
            while j < bytes.len() {
                if bytes[j] == quote {
                    if bytes.get(j + 1) == Some(&quote) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(bytes.len())
        }
        b'$' => {
            let tag_end = dollar_tag_end(bytes, i)?;
            let tag = &bytes[i..tag_end];
            let close = bytes[tag_end..]
                .windows(tag.len())
                .position(|w| w == tag)
                .map(|p| tag_end + p + tag.len());
            Some(close.unwrap_or(bytes.len()))
        }
        _ => None,
    }
}

/// Returns the offset just past a dollar-quote opening tag starting at `i`.
///
/// `$1` (a positional parameter) is not a tag, since tags cannot start with a
/// digit.
fn dollar_tag_end(bytes: &[u8], i: usize) -> Option<usize> {
    if i > 0 && (bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_') {
        return None;
    }
    let mut j = i + 1;
    if let Some(first) = bytes.get(j) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while let Some(b) = bytes.get(j) {
        match b {
            b'$' => return Some(j + 1),
            b if b.is_ascii_alphanumeric() || *b == b'_' => j += 1,
            _ => return None,
        }
    }
    None
}

/// Remove `--` line comments and `/* */` block comments.
///
/// Comment markers inside string literals, quoted identifiers and
/// dollar-quoted bodies are left alone. Line comments keep their terminating
/// newline; block comments (which may nest) are replaced by a single space so
/// that tokens on either side stay separated.
pub fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = quoted_end(bytes, i) {
            i = end;
            continue;
        }
        if bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-') {
            out.push_str(&sql[copied..i]);
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            copied = i;
            continue;
        }
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            out.push_str(&sql[copied..i]);
            out.push(' ');
            let mut depth = 0usize;
            while i < bytes.len() {
                if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    depth += 1;
                    i += 2;
                } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    depth -= 1;
                    i += 2;
                    if depth == 0 {
                        break;
                    }
                } else {
                    i += 1;
                }
            }
            copied = i.min(bytes.len());
            continue;
        }
        i += 1;
    }

    out.push_str(&sql[copied..]);
    out
}

/// Find the parenthesis closing the one at `open`.
///
/// Parentheses inside quoted regions do not count. Returns `None` if `open`
/// is not a `(` or the input ends before the balance returns to zero.
pub fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        if let Some(end) = quoted_end(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split on `delimiter` wherever it appears outside parentheses and quotes.
///
/// Pieces are trimmed; empty pieces are dropped.
pub fn split_top_level(sql: &str, delimiter: u8) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = quoted_end(bytes, i) {
            i = end;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b if b == delimiter && depth == 0 => {
                parts.push(&sql[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&sql[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Blank out the contents of string literals and dollar-quoted bodies.
///
/// The result has the same byte length as the input; masked bytes become
/// spaces while the delimiters stay. Quoted identifiers are kept.
pub(crate) fn mask_literals(sql: &str) -> String {
    mask(sql, false, false)
}

/// Blank out everything a keyword search must not look into: string
/// literals, quoted identifiers, dollar-quoted bodies and anything nested
/// inside parentheses.
///
/// The result is uppercased and has the same byte length as the input.
pub(crate) fn mask_nested(sql: &str) -> String {
    mask(sql, true, true).to_ascii_uppercase()
}

fn mask(sql: &str, identifiers: bool, nested: bool) -> String {
    let bytes = sql.as_bytes();
    let mut out = bytes.to_vec();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = quoted_end(bytes, i) {
            let keep_delimiters = bytes[i] != b'$';
            let is_identifier = bytes[i] == b'"';
            if !is_identifier || identifiers {
                let (from, to) = if keep_delimiters {
                    (i + 1, end.saturating_sub(1).max(i + 1))
                } else {
                    (i, end)
                };
                out[from..to].fill(b' ');
            }
            if nested && depth > 0 {
                out[i..end].fill(b' ');
            }
            i = end;
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if nested && depth > 0 => out[i] = b' ',
            _ => {}
        }
        i += 1;
    }

    // Masked spans cover whole characters, except for an unterminated
    // literal that ends mid-character.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// A word in a masked clause, with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Split a masked clause into words (`[A-Za-z0-9_]+` runs).
pub(crate) fn tokens(masked: &str) -> Vec<Token<'_>> {
    let bytes = masked.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token {
                text: &masked[start..i],
                start,
                end: i,
            });
        } else {
            i += 1;
        }
    }
    tokens
}

/// Index of the first token where the keyword sequence `words` begins.
pub(crate) fn find_sequence(tokens: &[Token<'_>], words: &[&str]) -> Option<usize> {
    if words.is_empty() || tokens.len() < words.len() {
        return None;
    }
    (0..=tokens.len() - words.len()).find(|&i| {
        words
            .iter()
            .zip(&tokens[i..])
            .all(|(word, token)| token.text == *word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_line_and_block_comments() {
        let sql = "a INT, -- trailing note\nb TEXT /* inline */ NOT NULL";
        assert_eq!(strip_comments(sql), "a INT, \nb TEXT   NOT NULL");
    }

    #[test]
    fn test_strip_nested_block_comment() {
        assert_eq!(strip_comments("x /* a /* b */ c */ y"), "x   y");
    }

    #[test]
    fn test_strip_keeps_markers_inside_strings() {
        let sql = "note TEXT DEFAULT '-- not a comment /* nope */'";
        assert_eq!(strip_comments(sql), sql);
        let sql = "body TEXT DEFAULT $$ -- still text $$";
        assert_eq!(strip_comments(sql), sql);
    }

    #[test]
    fn test_matching_paren_skips_strings() {
        let sql = "t (a TEXT DEFAULT ')', b NUMERIC(10,2)) tail";
        let open = sql.find('(').unwrap();
        let close = matching_paren(sql, open).unwrap();
        assert_eq!(&sql[close + 1..], " tail");
    }

    #[test]
    fn test_matching_paren_unbalanced() {
        assert_eq!(matching_paren("t (a INT, b INT", 2), None);
        assert_eq!(matching_paren("abc", 0), None);
    }

    #[test]
    fn test_split_top_level() {
        let parts = split_top_level("a NUMERIC(10,2), b TEXT DEFAULT 'x, (y', c INT", b',');
        assert_eq!(
            parts,
            vec!["a NUMERIC(10,2)", "b TEXT DEFAULT 'x, (y'", "c INT"]
        );
    }

    #[test]
    fn test_dollar_param_is_not_a_quote() {
        assert_eq!(split_top_level("$1, $2", b','), vec!["$1", "$2"]);
    }

    #[test]
    fn test_mask_nested_hides_parens_and_strings() {
        let masked = mask_nested("price numeric(10,2) default 'not null' check (x is not null)");
        let words: Vec<_> = tokens(&masked).into_iter().map(|t| t.text).collect();
        assert_eq!(words, vec!["PRICE", "NUMERIC", "DEFAULT", "CHECK"]);
    }

    #[test]
    fn test_find_sequence() {
        let masked = mask_nested("a int not null unique");
        let toks = tokens(&masked);
        assert_eq!(find_sequence(&toks, &["NOT", "NULL"]), Some(2));
        assert_eq!(find_sequence(&toks, &["UNIQUE"]), Some(4));
        assert_eq!(find_sequence(&toks, &["DEFAULT"]), None);
    }
}
