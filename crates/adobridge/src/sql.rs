//! Statement helpers: read/write classification, positional parameter
//! binding and result-cache keys

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::Value;

/// Whether a statement is treated as a cacheable read.
///
/// Purely syntactic: trimmed, case-insensitive `select` prefix. CTEs
/// (`WITH ... SELECT`) and stored procedure calls count as writes.
pub fn is_read_only(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}

/// Render a value as a SQL literal
pub fn to_sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float64(v) if v.is_finite() => v.to_string(),
        Value::Float64(_) => "NULL".to_string(),
        Value::String(s) => quote(s),
        Value::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
        Value::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => quote(&t.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(dt) => quote(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::DateTimeTz(dt) => quote(&dt.to_rfc3339()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Byte offsets of `?` placeholders outside quoted literals
fn placeholder_offsets(sql: &str) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut in_quote: Option<char> = None;
    for (idx, c) in sql.char_indices() {
        match in_quote {
            // a doubled quote re-enters the literal on the next char
            Some(q) if c == q => in_quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => in_quote = Some(c),
                '?' => offsets.push(idx),
                _ => {}
            },
        }
    }
    offsets
}

/// Substitute positional `?` placeholders with literals.
///
/// Placeholders inside `'...'` or `"..."` are left alone. The number of
/// placeholders must equal the number of parameters.
pub fn bind_parameters(sql: &str, params: &[Value]) -> Result<String> {
    let offsets = placeholder_offsets(sql);
    if offsets.len() != params.len() {
        return Err(Error::validation(format!(
            "statement has {} placeholder(s) but {} parameter(s) were supplied",
            offsets.len(),
            params.len()
        )));
    }
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut bound = String::with_capacity(sql.len() + params.len() * 8);
    let mut last = 0;
    for (offset, param) in offsets.into_iter().zip(params) {
        bound.push_str(&sql[last..offset]);
        bound.push_str(&to_sql_literal(param));
        last = offset + 1;
    }
    bound.push_str(&sql[last..]);
    Ok(bound)
}

/// Deterministic cache key for a statement and its parameters
pub fn cache_key(sql: &str, params: &[Value]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(params)?);
    Ok(format!("query:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_read_only_classification() {
        assert!(is_read_only("SELECT * FROM t"));
        assert!(is_read_only("   select 1"));
        assert!(is_read_only("\n\tSeLeCt x"));
        assert!(!is_read_only("UPDATE t SET a = 1"));
        assert!(!is_read_only("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_read_only("sel"));
        assert!(!is_read_only(""));
    }

    #[test]
    fn test_bind_parameters() {
        let sql = bind_parameters(
            "SELECT * FROM t WHERE name = ? AND age > ? AND active = ?",
            &[Value::from("O'Brien"), Value::Int32(30), Value::Bool(true)],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE name = 'O''Brien' AND age > 30 AND active = 1"
        );
    }

    #[test]
    fn test_placeholders_in_literals_ignored() {
        let sql = bind_parameters(
            "SELECT '?' AS q, 'it''s ?' FROM t WHERE id = ?",
            &[Value::Int64(7)],
        )
        .unwrap();
        assert_eq!(sql, "SELECT '?' AS q, 'it''s ?' FROM t WHERE id = 7");
    }

    #[test]
    fn test_count_mismatch() {
        let err = bind_parameters("SELECT ?", &[]).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
        assert!(bind_parameters("SELECT 1", &[Value::Null]).is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(to_sql_literal(&Value::Null), "NULL");
        assert_eq!(to_sql_literal(&Value::Float64(f64::NAN)), "NULL");
        assert_eq!(to_sql_literal(&Value::Float64(1.5)), "1.5");
        assert_eq!(to_sql_literal(&Value::Bytes(vec![0xde, 0xad])), "0xDEAD");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(to_sql_literal(&Value::Date(date)), "'2024-03-09'");
        let dt = date.and_hms_opt(8, 5, 0).unwrap();
        assert_eq!(to_sql_literal(&Value::DateTime(dt)), "'2024-03-09T08:05:00'");
    }

    #[test]
    fn test_cache_key_deterministic() {
        let a = cache_key("SELECT ?", &[Value::Int32(1)]).unwrap();
        let b = cache_key("SELECT ?", &[Value::Int32(1)]).unwrap();
        let c = cache_key("SELECT ?", &[Value::Int32(2)]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("query:"));
        assert_eq!(a.len(), "query:".len() + 64);
    }
}
