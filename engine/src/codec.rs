//! Column codec.
//!
//! Maps semantic [`Value`]s to SQLite storage classes and back, to remote
//! field values and back, and sniffs declared column types following
//! SQLite's type affinity rules.

use crate::schema::FieldType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Canonical text form for dates stored locally (always UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A semantic field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    Date(DateTime<Utc>),
    Blob(Vec<u8>),
}

impl Value {
    /// The field type this value would infer, `None` for `Null`.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Real(_) => Some(FieldType::Real),
            Value::Bool(_) => Some(FieldType::Bool),
            Value::Text(_) => Some(FieldType::Text),
            Value::Date(_) => Some(FieldType::Date),
            Value::Blob(_) => Some(FieldType::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Convert this value into `target`, returning `None` when no sensible
    /// conversion exists. Callers fall back to the field default.
    pub fn coerce(&self, target: FieldType) -> Option<Value> {
        match (target, self) {
            (_, Value::Null) => None,

            (FieldType::Integer, Value::Integer(i)) => Some(Value::Integer(*i)),
            (FieldType::Integer, Value::Real(f)) => Some(Value::Integer(*f as i64)),
            (FieldType::Integer, Value::Bool(b)) => Some(Value::Integer(*b as i64)),
            (FieldType::Integer, Value::Text(s)) => parse_integer(s).map(Value::Integer),
            (FieldType::Integer, Value::Date(d)) => Some(Value::Integer(d.timestamp())),

            (FieldType::Real, Value::Real(f)) => Some(Value::Real(*f)),
            (FieldType::Real, Value::Integer(i)) => Some(Value::Real(*i as f64)),
            (FieldType::Real, Value::Bool(b)) => Some(Value::Real(*b as i64 as f64)),
            (FieldType::Real, Value::Text(s)) => s.trim().parse().ok().map(Value::Real),
            (FieldType::Real, Value::Date(d)) => Some(Value::Real(d.timestamp() as f64)),

            (FieldType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (FieldType::Bool, Value::Integer(i)) => Some(Value::Bool(*i != 0)),
            (FieldType::Bool, Value::Real(f)) => Some(Value::Bool(*f != 0.0)),
            (FieldType::Bool, Value::Text(s)) => parse_bool(s).map(Value::Bool),

            (FieldType::Text, Value::Text(s)) => Some(Value::Text(s.clone())),
            (FieldType::Text, Value::Integer(i)) => Some(Value::Text(i.to_string())),
            (FieldType::Text, Value::Real(f)) => Some(Value::Text(f.to_string())),
            (FieldType::Text, Value::Bool(b)) => Some(Value::Text((*b as i64).to_string())),
            (FieldType::Text, Value::Date(d)) => Some(Value::Text(format_date(d))),
            (FieldType::Text, Value::Blob(b)) => {
                String::from_utf8(b.clone()).ok().map(Value::Text)
            }

            (FieldType::Date, Value::Date(d)) => Some(Value::Date(*d)),
            (FieldType::Date, Value::Text(s)) => parse_date(s).map(Value::Date),
            (FieldType::Date, Value::Integer(i)) => date_from_seconds(*i as f64).map(Value::Date),
            (FieldType::Date, Value::Real(f)) => date_from_seconds(*f).map(Value::Date),

            (FieldType::Blob, Value::Blob(b)) => Some(Value::Blob(b.clone())),
            (FieldType::Blob, Value::Text(s)) => Some(Value::Blob(s.clone().into_bytes())),

            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Bool(b) => write!(f, "{}", *b as i64),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", format_date(d)),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// The storage classes of the embedded database.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// Column type derived from a declared column type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Blob,
    Null,
    Date,
}

const BLOB_TYPES: &[&str] = &["BINARY", "BLOB", "VARBINARY"];
const CHAR_TYPES: &[&str] = &[
    "CHAR",
    "CHARACTER",
    "CLOB",
    "NATIONAL VARYING CHARACTER",
    "NATIVE CHARACTER",
    "NCHAR",
    "NVARCHAR",
    "TEXT",
    "VARCHAR",
    "VARIANT",
    "VARYING CHARACTER",
];
const DATE_TYPES: &[&str] = &["DATE", "DATETIME", "TIME", "TIMESTAMP"];
const INT_TYPES: &[&str] = &[
    "BIGINT",
    "BIT",
    "BOOL",
    "BOOLEAN",
    "INT",
    "INT2",
    "INT8",
    "INTEGER",
    "MEDIUMINT",
    "SMALLINT",
    "TINYINT",
];
const NULL_TYPES: &[&str] = &["NULL"];
const REAL_TYPES: &[&str] = &[
    "DECIMAL",
    "DOUBLE",
    "DOUBLE PRECISION",
    "FLOAT",
    "NUMERIC",
    "REAL",
];

/// Map a declared column type (e.g. `VARCHAR(255)`) to a [`ColumnKind`].
///
/// Unrecognized declared types are treated as text.
pub fn sniff_declared_type(declared: &str) -> ColumnKind {
    let upper = declared.to_uppercase();
    let base = match upper.find('(') {
        Some(pos) => &upper[..pos],
        None => upper.as_str(),
    }
    .trim();

    if INT_TYPES.contains(&base) {
        ColumnKind::Integer
    } else if REAL_TYPES.contains(&base) {
        ColumnKind::Real
    } else if CHAR_TYPES.contains(&base) {
        ColumnKind::Text
    } else if BLOB_TYPES.contains(&base) {
        ColumnKind::Blob
    } else if NULL_TYPES.contains(&base) {
        ColumnKind::Null
    } else if DATE_TYPES.contains(&base) {
        ColumnKind::Date
    } else {
        ColumnKind::Text
    }
}

/// Encode a value for binding into a statement.
pub fn to_storage(value: &Value) -> StorageValue {
    match value {
        Value::Null => StorageValue::Null,
        Value::Integer(i) => StorageValue::Integer(*i),
        Value::Real(f) => StorageValue::Real(*f),
        Value::Bool(b) => StorageValue::Integer(*b as i64),
        Value::Text(s) => StorageValue::Text(s.clone()),
        Value::Date(d) => StorageValue::Text(format_date(d)),
        Value::Blob(b) => StorageValue::Blob(b.clone()),
    }
}

/// Decode a stored value read from a column of the given kind.
pub fn from_storage(storage: StorageValue, kind: ColumnKind) -> Value {
    match (kind, storage) {
        (_, StorageValue::Null) | (ColumnKind::Null, _) => Value::Null,

        (ColumnKind::Integer, StorageValue::Integer(i)) => Value::Integer(i),
        (ColumnKind::Integer, StorageValue::Real(f)) => Value::Integer(f as i64),
        (ColumnKind::Integer, StorageValue::Text(s)) => Value::Integer(parse_integer(&s).unwrap_or(0)),
        (ColumnKind::Integer, StorageValue::Blob(b)) => Value::Blob(b),

        (ColumnKind::Real, StorageValue::Real(f)) => Value::Real(f),
        (ColumnKind::Real, StorageValue::Integer(i)) => Value::Real(i as f64),
        (ColumnKind::Real, StorageValue::Text(s)) => Value::Real(s.trim().parse().unwrap_or(0.0)),
        (ColumnKind::Real, StorageValue::Blob(b)) => Value::Blob(b),

        (ColumnKind::Blob, StorageValue::Blob(b)) => Value::Blob(b),
        (ColumnKind::Blob, StorageValue::Text(s)) => Value::Blob(s.into_bytes()),
        (ColumnKind::Blob, other) => from_storage_untyped(other),

        (ColumnKind::Date, StorageValue::Text(s)) => {
            // Text that is not a date falls through to the numeric path, as
            // legacy rows stored seconds since epoch.
            let secs = s.trim().parse::<f64>().unwrap_or(0.0);
            Value::Date(parse_date(&s).or_else(|| date_from_seconds(secs)).unwrap_or_default())
        }
        (ColumnKind::Date, StorageValue::Integer(i)) => {
            Value::Date(date_from_seconds(i as f64).unwrap_or_default())
        }
        (ColumnKind::Date, StorageValue::Real(f)) => {
            Value::Date(date_from_seconds(f).unwrap_or_default())
        }
        (ColumnKind::Date, StorageValue::Blob(b)) => Value::Blob(b),

        (ColumnKind::Text, StorageValue::Text(s)) => Value::Text(s),
        (ColumnKind::Text, StorageValue::Integer(i)) => Value::Text(i.to_string()),
        (ColumnKind::Text, StorageValue::Real(f)) => Value::Text(f.to_string()),
        (ColumnKind::Text, StorageValue::Blob(b)) => {
            Value::Text(String::from_utf8_lossy(&b).into_owned())
        }
    }
}

/// Decode a value from an expression column that has no declared type.
pub fn from_storage_untyped(storage: StorageValue) -> Value {
    match storage {
        StorageValue::Null => Value::Null,
        StorageValue::Integer(i) => Value::Integer(i),
        StorageValue::Real(f) => Value::Real(f),
        StorageValue::Text(s) => Value::Text(s),
        StorageValue::Blob(b) => Value::Blob(b),
    }
}

/// Field value types understood by the remote record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RemoteValue {
    Int64(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
}

/// Encode a value as a remote field. `Null` clears the field.
pub fn to_remote(value: &Value) -> Option<RemoteValue> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(RemoteValue::Int64(*i)),
        Value::Real(f) => Some(RemoteValue::Double(*f)),
        Value::Bool(b) => Some(RemoteValue::Int64(*b as i64)),
        Value::Text(s) => Some(RemoteValue::String(s.clone())),
        Value::Date(d) => Some(RemoteValue::Date(*d)),
        Value::Blob(b) => Some(RemoteValue::Bytes(b.clone())),
    }
}

/// Decode a remote field into the declared local field type.
pub fn from_remote(remote: &RemoteValue, target: FieldType) -> Option<Value> {
    let raw = match remote {
        RemoteValue::Int64(i) => Value::Integer(*i),
        RemoteValue::Double(f) => Value::Real(*f),
        RemoteValue::String(s) => Value::Text(s.clone()),
        RemoteValue::Date(d) => Value::Date(*d),
        RemoteValue::Bytes(b) => Value::Blob(b.clone()),
    };
    raw.coerce(target)
}

/// Format a date in the canonical local storage form.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a stored date. Date-only values (`yyyy-MM-dd`) are read as midnight.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.len() == 10 {
        let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Interpret a number as seconds since the Unix epoch.
pub fn date_from_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}

fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|f| f as i64))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        other => other.parse::<i64>().ok().map(|i| i != 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> DateTime<Utc> {
        parse_date(s).unwrap()
    }

    #[test]
    fn sniff_strips_parenthetical_and_case() {
        assert_eq!(sniff_declared_type("varchar(255)"), ColumnKind::Text);
        assert_eq!(sniff_declared_type("INTEGER"), ColumnKind::Integer);
        assert_eq!(sniff_declared_type("boolean"), ColumnKind::Integer);
        assert_eq!(sniff_declared_type("DECIMAL(10,2)"), ColumnKind::Real);
        assert_eq!(sniff_declared_type("double precision"), ColumnKind::Real);
        assert_eq!(sniff_declared_type("DATETIME"), ColumnKind::Date);
        assert_eq!(sniff_declared_type("blob"), ColumnKind::Blob);
        assert_eq!(sniff_declared_type("NULL"), ColumnKind::Null);
    }

    #[test]
    fn sniff_unknown_defaults_to_text() {
        assert_eq!(sniff_declared_type("JSONB"), ColumnKind::Text);
        assert_eq!(sniff_declared_type(""), ColumnKind::Text);
    }

    #[test]
    fn bool_stored_as_integer() {
        assert_eq!(to_storage(&Value::Bool(true)), StorageValue::Integer(1));
        assert_eq!(to_storage(&Value::Bool(false)), StorageValue::Integer(0));
    }

    #[test]
    fn date_stored_as_canonical_text() {
        let d = date("2024-02-29 13:45:10");
        assert_eq!(
            to_storage(&Value::Date(d)),
            StorageValue::Text("2024-02-29 13:45:10".into())
        );
    }

    #[test]
    fn date_decode_paths() {
        let full = from_storage(StorageValue::Text("2024-02-29 13:45:10".into()), ColumnKind::Date);
        assert_eq!(full, Value::Date(date("2024-02-29 13:45:10")));

        let date_only = from_storage(StorageValue::Text("2024-02-29".into()), ColumnKind::Date);
        assert_eq!(date_only, Value::Date(date("2024-02-29 00:00:00")));

        let legacy = from_storage(StorageValue::Real(86400.0), ColumnKind::Date);
        assert_eq!(legacy, Value::Date(date("1970-01-02 00:00:00")));

        let legacy_text = from_storage(StorageValue::Text("3600".into()), ColumnKind::Date);
        assert_eq!(legacy_text, Value::Date(date("1970-01-01 01:00:00")));
    }

    #[test]
    fn null_storage_is_null_for_every_kind() {
        for kind in [
            ColumnKind::Integer,
            ColumnKind::Real,
            ColumnKind::Text,
            ColumnKind::Blob,
            ColumnKind::Date,
            ColumnKind::Null,
        ] {
            assert_eq!(from_storage(StorageValue::Null, kind), Value::Null);
        }
    }

    #[test]
    fn text_column_stringifies_numbers() {
        assert_eq!(
            from_storage(StorageValue::Integer(42), ColumnKind::Text),
            Value::Text("42".into())
        );
    }

    #[test]
    fn coerce_falls_back_to_none() {
        assert_eq!(Value::Text("abc".into()).coerce(FieldType::Integer), None);
        assert_eq!(Value::Blob(vec![1, 2]).coerce(FieldType::Date), None);
        assert_eq!(Value::Null.coerce(FieldType::Text), None);
    }

    #[test]
    fn coerce_integer_to_bool() {
        assert_eq!(Value::Integer(1).coerce(FieldType::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::Integer(0).coerce(FieldType::Bool), Some(Value::Bool(false)));
        assert_eq!(Value::Text("true".into()).coerce(FieldType::Bool), Some(Value::Bool(true)));
    }

    #[test]
    fn remote_bool_travels_as_int64() {
        assert_eq!(to_remote(&Value::Bool(true)), Some(RemoteValue::Int64(1)));
        assert_eq!(
            from_remote(&RemoteValue::Int64(1), FieldType::Bool),
            Some(Value::Bool(true))
        );
        assert_eq!(to_remote(&Value::Null), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_integer_survives_storage(i in any::<i64>()) {
                let stored = to_storage(&Value::Integer(i));
                prop_assert_eq!(from_storage(stored, ColumnKind::Integer), Value::Integer(i));
            }

            #[test]
            fn prop_text_survives_storage(s in ".*") {
                let stored = to_storage(&Value::Text(s.clone()));
                prop_assert_eq!(from_storage(stored, ColumnKind::Text), Value::Text(s));
            }

            #[test]
            fn prop_date_survives_storage_to_the_second(secs in 0i64..4_102_444_800) {
                let d = Utc.timestamp_opt(secs, 0).single().unwrap();
                let stored = to_storage(&Value::Date(d));
                prop_assert_eq!(from_storage(stored, ColumnKind::Date), Value::Date(d));
            }
        }
    }
}
