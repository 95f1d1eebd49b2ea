//! SQL text helpers: identifier quoting and client-side parameter binding.
//!
//! `CREATE VIEW` cannot carry bind parameters, so a live query's `$n`
//! placeholders are rendered as escaped literals before the view is created.

use pg_escape::{quote_identifier, quote_literal};

use crate::error::BackendError;
use crate::types::{TableRef, Value};

/// `schema.table` with both parts quoted as needed.
#[must_use]
pub fn qualified_name(table: &TableRef) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table.schema),
        quote_identifier(&table.table)
    )
}

/// Quote a single identifier.
#[must_use]
pub fn ident(name: &str) -> String {
    quote_identifier(name).to_string()
}

/// Quote a string literal.
#[must_use]
pub fn literal(value: &str) -> String {
    quote_literal(value).to_string()
}

/// Render a value as a SQL literal.
#[must_use]
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        // Parenthesised so `x - $1` cannot turn into a `--` comment.
        Value::Int(i) if *i < 0 => format!("({i})"),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "'NaN'::float8".to_string(),
        Value::Float(f) if f.is_infinite() && *f > 0.0 => "'Infinity'::float8".to_string(),
        Value::Float(f) if f.is_infinite() => "'-Infinity'::float8".to_string(),
        // Sign bit, not `< 0.0`: `-0.0` also renders with a leading minus.
        Value::Float(f) if f.is_sign_negative() => format!("({f}::float8)"),
        Value::Float(f) => format!("{f}::float8"),
        Value::Text(s) => literal(s),
        Value::Json(v) => format!("{}::jsonb", literal(&v.to_string())),
    }
}

/// Substitute `$n` placeholders in `query` with rendered `params`.
///
/// Placeholders inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies are left untouched.
///
/// # Errors
///
/// Returns [`BackendError::InvalidInput`] if a placeholder refers past the
/// end of `params`.
pub fn bind_params(query: &str, params: &[Value]) -> Result<String, BackendError> {
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut copied = 0;

    walk_code(bytes, |i| {
        if bytes[i] != b'$' {
            return Ok(None);
        }
        let digits_end = i + 1 + bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
        let n: usize = query[i + 1..digits_end].parse().map_err(|_| {
            BackendError::invalid_input(format!(
                "placeholder '{}' is out of range",
                &query[i..digits_end]
            ))
        })?;
        let value = n.checked_sub(1).and_then(|idx| params.get(idx)).ok_or_else(|| {
            BackendError::invalid_input(format!(
                "query references ${n} but {} parameter(s) were supplied",
                params.len()
            ))
        })?;
        out.push_str(&query[copied..i]);
        out.push_str(&render_literal(value));
        copied = digits_end;
        Ok(Some(digits_end))
    })?;

    out.push_str(&query[copied..]);
    Ok(out)
}

/// The body of a single statement, without trailing semicolons or whitespace.
///
/// # Errors
///
/// Returns [`BackendError::InvalidInput`] if `query` is empty or holds more
/// than one statement.
pub fn single_statement(query: &str) -> Result<&str, BackendError> {
    let bytes = query.as_bytes();
    let mut end: Option<usize> = None;
    let mut trailing_code = false;

    walk_code(bytes, |i| {
        match (bytes[i], end) {
            (b';', None) => end = Some(i),
            (b';', Some(_)) => {}
            (b, Some(_)) if !b.is_ascii_whitespace() => trailing_code = true,
            _ => {}
        }
        Ok(None)
    })?;

    if trailing_code {
        return Err(BackendError::invalid_input(
            "live queries take exactly one statement",
        ));
    }
    let body = query[..end.unwrap_or(query.len())].trim();
    if body.is_empty() {
        return Err(BackendError::invalid_input("query text is empty"));
    }
    Ok(body)
}

/// Walk the bytes of `sql` that are code: outside string literals, quoted
/// identifiers, comments and dollar-quoted bodies.
///
/// `visit` sees each such byte position (a `$` only when it starts a
/// numbered placeholder) and may return the next position to resume at.
fn walk_code(
    bytes: &[u8],
    mut visit: impl FnMut(usize) -> Result<Option<usize>, BackendError>,
) -> Result<(), BackendError> {
    let mut i = 0;
    while i < bytes.len() {
        i = match bytes[i] {
            b'\'' => {
                let backslash_escapes =
                    i > 0 && matches!(bytes[i - 1], b'E' | b'e') && !is_ident_byte_at(bytes, i - 1);
                skip_quoted(bytes, i, b'\'', backslash_escapes)
            }
            b'"' => skip_quoted(bytes, i, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => skip_block_comment(bytes, i),
            b'$' if i > 0 && is_ident_byte(bytes[i - 1]) => i + 1,
            b'$' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                skip_dollar_quoted(bytes, i).unwrap_or(i + 1)
            }
            _ => visit(i)?.unwrap_or(i + 1),
        };
    }
    Ok(())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Whether the byte at `pos` continues an identifier that started earlier.
fn is_ident_byte_at(bytes: &[u8], pos: usize) -> bool {
    pos > 0 && is_ident_byte(bytes[pos - 1])
}

/// Index just past the closing quote of the quoted run starting at `start`.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |offset| start + offset + 1)
}

/// Block comments nest in PostgreSQL.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// If a `$tag$` opener starts at `start`, the index past its closing tag.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> Option<usize> {
    let tag_len = bytes[start + 1..]
        .iter()
        .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80)
        .count();
    let close = start + 1 + tag_len;
    if bytes.get(close) != Some(&b'$') {
        return None;
    }
    let tag = &bytes[start..=close];
    let body = close + 1;
    Some(
        bytes[body..]
            .windows(tag.len())
            .position(|w| w == tag)
            .map_or(bytes.len(), |offset| body + offset + tag.len()),
    )
}
