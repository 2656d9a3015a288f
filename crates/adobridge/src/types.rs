//! Value types for adobridge
//!
//! Rows travel through the engine as ordered sequences of named, typed
//! values. The legacy client only distinguishes a handful of field types
//! (string, integer, double, boolean, date, variant), so the richer
//! [`Value`] kinds collapse onto [`FieldType`] when field metadata is
//! derived for a recordset.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

/// SQL value type that can hold any database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// Text string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Date without time
    Date(NaiveDate),
    /// Time without date
    Time(NaiveTime),
    /// Timestamp without timezone
    DateTime(NaiveDateTime),
    /// Timestamp with timezone
    DateTimeTz(DateTime<Utc>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::String(_) => "VARCHAR",
            Self::Bytes(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
        }
    }

    /// The legacy field type this value reports as
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::Boolean,
            Self::Int32(_) | Self::Int64(_) => FieldType::Integer,
            Self::Float64(_) => FieldType::Double,
            Self::String(_) => FieldType::String,
            Self::Date(_) | Self::Time(_) | Self::DateTime(_) | Self::DateTimeTz(_) => {
                FieldType::Date
            }
            Self::Null | Self::Bytes(_) => FieldType::Variant,
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float64(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Best-effort timestamp view used for date comparisons
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(d) => d.and_hms_opt(0, 0, 0),
            Self::DateTime(dt) => Some(*dt),
            Self::DateTimeTz(dt) => Some(dt.naive_utc()),
            Self::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_rfc3339()),
            Self::Null | Self::Bytes(_) => None,
        }
    }

    #[inline]
    fn is_numeric(&self) -> bool {
        matches!(self, Self::Int32(_) | Self::Int64(_) | Self::Float64(_))
    }

    #[inline]
    fn is_temporal(&self) -> bool {
        matches!(self, Self::Date(_) | Self::DateTime(_) | Self::DateTimeTz(_))
    }

    /// Loose ordering across kinds, the way legacy clients compare field
    /// values: NULL sorts first, numbers compare numerically, strings compare
    /// case-insensitively, and a string is coerced when compared with a number
    /// or a date.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int32(_) | Self::Int64(_), Self::Int32(_) | Self::Int64(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            (Self::String(a), Self::String(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() || b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (a, b) if a.is_temporal() || b.is_temporal() => {
                Some(a.as_datetime()?.cmp(&b.as_datetime()?))
            }
            (Self::Bool(_), _) | (_, Self::Bool(_)) => {
                Some(self.as_bool()?.cmp(&other.as_bool()?))
            }
            _ => Some(self.as_string()?.cmp(&other.as_string()?)),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int32(_) | Self::Int64(_) | Self::Float64(_) => 2,
            Self::Date(_) | Self::DateTime(_) | Self::DateTimeTz(_) => 3,
            Self::Time(_) => 4,
            Self::String(_) => 5,
            Self::Bytes(_) => 6,
        }
    }

    /// Total order used for sorting.
    ///
    /// Kinds rank `Null < Bool < numeric < date/time < time of day < String
    /// < Bytes`; within a kind values compare naturally, with NaN after every
    /// other number. Unlike [`compare`](Self::compare) there is no coercion
    /// between kinds.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => cmp_floats(*a, *b),
            (Self::Float64(f), b) if b.is_numeric() => match b.as_i64() {
                Some(i) => cmp_int_float(i, *f).reverse(),
                None => Ordering::Equal,
            },
            (a, Self::Float64(f)) if a.is_numeric() => match a.as_i64() {
                Some(i) => cmp_int_float(i, *f),
                None => Ordering::Equal,
            },
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_i64().cmp(&b.as_i64()),
            (a, b) if a.is_temporal() && b.is_temporal() => a.as_datetime().cmp(&b.as_datetime()),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a
                .to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

/// NaN sorts after every other float
fn cmp_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer with a float, NaN greatest
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if f.is_nan() || f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    i.cmp(&(whole as i64)).then_with(|| {
        let frac = f - whole;
        if frac > 0.0 {
            Ordering::Less
        } else if frac < 0.0 {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    })
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column names
    columns: Vec<String>,
    /// Column values (same order as columns)
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Row with every column set to NULL
    pub fn nulls(columns: Vec<String>) -> Self {
        let values = vec![Value::Null; columns.len()];
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Column index by case-insensitive name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Get value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.index_of(name).and_then(|idx| self.values.get(idx))
    }

    /// Replace the value of a named column, returning the previous value
    pub fn set_by_name(&mut self, name: &str, value: Value) -> Option<Value> {
        let idx = self.index_of(name)?;
        Some(std::mem::replace(&mut self.values[idx], value))
    }

    /// Convert row to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Field types exposed to legacy recordset clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Text
    String,
    /// Whole number
    Integer,
    /// Floating point number
    Double,
    /// True/false
    Boolean,
    /// Date and/or time
    Date,
    /// Anything else, including NULL
    Variant,
}

impl FieldType {
    /// Defined size reported for fixed-width types
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Integer => Some(4),
            Self::Double | Self::Date => Some(8),
            Self::Boolean => Some(2),
            Self::Variant => Some(16),
            Self::String => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Variant => "variant",
        };
        f.write_str(name)
    }
}

/// Field metadata derived from query results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Column name
    pub name: String,
    /// Type inferred from the first row
    pub field_type: FieldType,
    /// Defined size: fixed width, or the longest string seen
    pub size: usize,
}

impl FieldMetadata {
    /// Derive field metadata for a result set.
    ///
    /// Types come from the first row's value kinds; with no rows every
    /// column is a variant.
    pub fn infer(columns: &[String], rows: &[Row]) -> Vec<FieldMetadata> {
        let first = rows.first();
        columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let field_type = first
                    .and_then(|row| row.get(idx))
                    .map(Value::field_type)
                    .unwrap_or(FieldType::Variant);
                let size = field_type.fixed_size().unwrap_or_else(|| {
                    rows.iter()
                        .filter_map(|row| row.get(idx).and_then(Value::as_str))
                        .map(|s| s.chars().count())
                        .max()
                        .unwrap_or(0)
                });
                FieldMetadata {
                    name: name.clone(),
                    field_type,
                    size,
                }
            })
            .collect()
    }
}

/// Result of one query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Returned rows, in backend order
    pub data: Vec<Row>,
    /// Rows affected by a write (or returned by a read)
    pub records_affected: u64,
    /// Wall-clock time spent serving this call
    pub execution_time: Duration,
    /// Whether the rows came from the query cache
    pub from_cache: bool,
    /// Field metadata
    pub fields: Vec<FieldMetadata>,
}

impl QueryResult {
    /// Number of rows returned
    #[inline]
    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i32, name: &str) -> Row {
        Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int32(id), Value::String(name.into())],
        )
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::String("yes".into()).as_bool(), Some(true));
        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_compare_across_kinds() {
        assert_eq!(
            Value::Int32(3).compare(&Value::Float64(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::String("abc".into()).compare(&Value::String("ABC".into())),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Null.compare(&Value::Int32(0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::String("10".into()).compare(&Value::Int64(9)),
            Some(Ordering::Greater)
        );

        let d = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            Value::Date(d).compare(&Value::String("2024-05-01".into())),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_sort_cmp_ranks_kinds() {
        let ordered = [
            Value::Null,
            Value::Bool(true),
            Value::Int64(-5),
            Value::Float64(2.5),
            Value::Int32(3),
            Value::Float64(f64::NAN),
            Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            Value::String("10".into()),
            Value::String("9".into()),
            Value::String("abc".into()),
            Value::Bytes(vec![0]),
        ];
        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                assert_eq!(a.sort_cmp(b), i.cmp(&j), "{:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_sort_cmp_int_float_exact() {
        let big = 1i64 << 53;
        assert_eq!(
            Value::Int64(big + 1).sort_cmp(&Value::Float64(big as f64)),
            Ordering::Greater
        );
        assert_eq!(Value::Int32(2).sort_cmp(&Value::Float64(2.0)), Ordering::Equal);
        assert_eq!(Value::Int32(-3).sort_cmp(&Value::Float64(-2.5)), Ordering::Less);
        assert_eq!(
            Value::Float64(1e300).sort_cmp(&Value::Int64(i64::MAX)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_row_set_by_name() {
        let mut r = row(1, "Alice");
        let old = r.set_by_name("NAME", Value::from("Bob"));
        assert_eq!(old, Some(Value::String("Alice".into())));
        assert_eq!(r.get_by_name("name"), Some(&Value::String("Bob".into())));
        assert!(r.set_by_name("missing", Value::Null).is_none());
    }

    #[test]
    fn test_field_inference_from_first_row() {
        let rows = vec![row(1, "Al"), row(2, "Barbara")];
        let fields = FieldMetadata::infer(rows[0].columns(), &rows);

        assert_eq!(fields[0].field_type, FieldType::Integer);
        assert_eq!(fields[0].size, 4);
        assert_eq!(fields[1].field_type, FieldType::String);
        assert_eq!(fields[1].size, 7);
    }

    #[test]
    fn test_field_inference_without_rows() {
        let fields = FieldMetadata::infer(&["a".to_string()], &[]);
        assert_eq!(fields[0].field_type, FieldType::Variant);
    }
}
