//! Parameter binding and placeholder validation.
//!
//! This module provides functions to bind `QueryParam` values to database-specific
//! query objects, and a scanner that counts the placeholders a statement expects
//! so that mismatches are rejected before a connection is leased.

use crate::db::driver::PlaceholderStyle;
use crate::error::{DbError, DbResult};
use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

/// Reject a statement whose placeholder count differs from `params.len()`.
pub fn check_param_count(
    statement: &str,
    params: &[QueryParam],
    style: PlaceholderStyle,
) -> DbResult<()> {
    let expected = count_placeholders(statement, style);
    if expected != params.len() {
        return Err(DbError::invalid_input(format!(
            "statement expects {} parameter(s) but {} were supplied",
            expected,
            params.len()
        )));
    }
    Ok(())
}

/// Count the bind parameters a statement expects.
///
/// Quoted strings, quoted identifiers and comments are skipped. Numbered
/// placeholders (`?3`, `$3`) count up to their highest index.
pub fn count_placeholders(statement: &str, style: PlaceholderStyle) -> usize {
    let bytes = statement.as_bytes();
    let mut sequential = 0usize;
    let mut highest = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i + 1, quote, style == PlaceholderStyle::Question);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_until(bytes, i + 2, b"\n");
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_until(bytes, i + 2, b"*/");
            }
            // MySQL line comment
            b'#' if style == PlaceholderStyle::Question => {
                i = skip_until(bytes, i + 1, b"\n");
            }
            b'?' if style == PlaceholderStyle::Question => {
                let (index, next) = read_number(bytes, i + 1);
                match index {
                    Some(n) => highest = highest.max(n),
                    None => sequential += 1,
                }
                i = next;
            }
            b'$' if style == PlaceholderStyle::Dollar => {
                let (index, next) = read_number(bytes, i + 1);
                match index {
                    Some(n) => {
                        highest = highest.max(n);
                        i = next;
                    }
                    None => i = skip_dollar_quoted(bytes, i),
                }
            }
            _ => i += 1,
        }
    }

    sequential.max(highest)
}

fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8, backslash_escapes: bool) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes && quote != b'`' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_until(bytes: &[u8], i: usize, terminator: &[u8]) -> usize {
    bytes[i.min(bytes.len())..]
        .windows(terminator.len())
        .position(|w| w == terminator)
        .map_or(bytes.len(), |pos| i + pos + terminator.len())
}

fn read_number(bytes: &[u8], start: usize) -> (Option<usize>, usize) {
    let end = bytes[start.min(bytes.len())..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |pos| start + pos);
    if end == start {
        return (None, start);
    }
    let number = std::str::from_utf8(&bytes[start..end])
        .ok()
        .and_then(|s| s.parse().ok());
    (number, end)
}

/// Skip a PostgreSQL dollar-quoted string (`$$...$$` or `$tag$...$tag$`)
/// starting at `start`; a lone `$` is stepped over.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> usize {
    let tag_end = bytes[start + 1..]
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
        .map(|pos| start + 1 + pos);
    match tag_end {
        Some(end) if bytes[end] == b'$' => {
            let tag = &bytes[start..=end];
            skip_until(bytes, end + 1, tag)
        }
        _ => start + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: PlaceholderStyle = PlaceholderStyle::Question;
    const D: PlaceholderStyle = PlaceholderStyle::Dollar;

    #[test]
    fn test_question_placeholders() {
        assert_eq!(count_placeholders("SELECT 1", Q), 0);
        assert_eq!(
            count_placeholders("UPDATE t SET x = 1 WHERE id = ?", Q),
            1
        );
        assert_eq!(
            count_placeholders("INSERT INTO t (a, b, c) VALUES (?, ?, ?)", Q),
            3
        );
    }

    #[test]
    fn test_quoted_text_is_ignored() {
        assert_eq!(
            count_placeholders("SELECT '?', \"?\", `?` FROM t WHERE a = ?", Q),
            1
        );
        assert_eq!(count_placeholders("SELECT 'it''s ?' WHERE a = ?", Q), 1);
        assert_eq!(count_placeholders(r"SELECT 'a\'?' WHERE a = ?", Q), 1);
    }

    #[test]
    fn test_comments_are_ignored() {
        assert_eq!(
            count_placeholders("SELECT a -- why?\nFROM t WHERE a = ?", Q),
            1
        );
        assert_eq!(
            count_placeholders("SELECT /* ? ? */ a FROM t WHERE a = ?", Q),
            1
        );
        assert_eq!(count_placeholders("SELECT 1 /* unterminated ?", Q), 0);
    }

    #[test]
    fn test_hash_comments_are_ignored() {
        assert_eq!(
            count_placeholders("SELECT id FROM t WHERE id = ? # why?\n", Q),
            1
        );
        assert_eq!(count_placeholders("SELECT 1 # trailing ?", Q), 0);
        assert_eq!(count_placeholders("SELECT '#', ? FROM t", Q), 1);
        // Not a comment marker for PostgreSQL
        assert_eq!(count_placeholders("SELECT a # $1 FROM t WHERE b = $2", D), 2);
    }

    #[test]
    fn test_numbered_question_placeholders() {
        assert_eq!(count_placeholders("SELECT ?1, ?2, ?1", Q), 2);
    }

    #[test]
    fn test_dollar_placeholders() {
        assert_eq!(count_placeholders("SELECT $1, $2, $1", D), 2);
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = ?", D), 0);
        assert_eq!(count_placeholders("SELECT $$ $1 $$, $1", D), 1);
        assert_eq!(count_placeholders("SELECT $fn$ $3 $fn$ WHERE a = $2", D), 2);
    }

    #[test]
    fn test_check_param_count() {
        let ok = check_param_count("SELECT * FROM t WHERE id = ?", &[QueryParam::Int(5)], Q);
        assert!(ok.is_ok());

        let err = check_param_count("SELECT * FROM t WHERE id = ?", &[], Q).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(err.to_string().contains("expects 1 parameter(s) but 0"));
    }
}
