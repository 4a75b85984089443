//! SQL values, bind type tags and result rows.
//!
//! Values are only ever sent to the server as positional parameters. The
//! inline rendering here exists for debug output.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A SQL value that can be bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
}

/// Type tag sent alongside each bound value.
///
/// Mirrors the four parameter kinds of a MySQL prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindType {
    /// `s`: strings and NULL.
    String,
    /// `i`: integers and booleans.
    Int,
    /// `b`: binary payloads.
    Blob,
    /// `d`: floating point.
    Double,
}

impl BindType {
    /// Returns the single-letter tag used by MySQL client libraries.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::String => 's',
            Self::Int => 'i',
            Self::Blob => 'b',
            Self::Double => 'd',
        }
    }
}

impl SqlValue {
    /// Infers the bind type tag for this value.
    #[must_use]
    pub const fn bind_type(&self) -> BindType {
        match self {
            Self::Null | Self::Text(_) => BindType::String,
            Self::Bool(_) | Self::Int(_) => BindType::Int,
            Self::Float(_) => BindType::Double,
            Self::Blob(_) => BindType::Blob,
        }
    }

    /// Returns `true` for [`SqlValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as an integer when it holds one (or a numeric string).
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a string slice when it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a textual rendering of scalar values, `None` for NULL and blobs.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::Blob(_) => None,
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(_) => f.write_str("[blob]"),
        }
    }
}

/// A result row: column name to value.
pub type Row = BTreeMap<String, SqlValue>;

/// Trait for types that can be converted to SQL values.
pub trait ToSqlValue {
    /// Converts the value to a `SqlValue`.
    fn to_sql_value(self) -> SqlValue;
}

impl ToSqlValue for SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self
    }
}

impl ToSqlValue for &SqlValue {
    fn to_sql_value(self) -> SqlValue {
        self.clone()
    }
}

impl ToSqlValue for bool {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Bool(self)
    }
}

macro_rules! int_to_sql_value {
    ($($ty:ty),*) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(self) -> SqlValue {
                    SqlValue::Int(i64::from(self))
                }
            }
        )*
    };
}

int_to_sql_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToSqlValue for u64 {
    fn to_sql_value(self) -> SqlValue {
        i64::try_from(self).map_or_else(|_| SqlValue::Text(self.to_string()), SqlValue::Int)
    }
}

impl ToSqlValue for usize {
    fn to_sql_value(self) -> SqlValue {
        (self as u64).to_sql_value()
    }
}

impl ToSqlValue for f64 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(self)
    }
}

impl ToSqlValue for f32 {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Float(f64::from(self))
    }
}

impl ToSqlValue for String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self)
    }
}

impl ToSqlValue for &String {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.clone())
    }
}

impl ToSqlValue for &str {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(String::from(self))
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(self) -> SqlValue {
        match self {
            Some(v) => v.to_sql_value(),
            None => SqlValue::Null,
        }
    }
}

impl ToSqlValue for Vec<u8> {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self)
    }
}

impl ToSqlValue for &[u8] {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Blob(self.to_vec())
    }
}

impl ToSqlValue for chrono::NaiveDate {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d").to_string())
    }
}

impl ToSqlValue for chrono::NaiveDateTime {
    fn to_sql_value(self) -> SqlValue {
        SqlValue::Text(self.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Text(n.to_string())),
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_type_inference() {
        assert_eq!(SqlValue::Null.bind_type(), BindType::String);
        assert_eq!(SqlValue::Bool(true).bind_type(), BindType::Int);
        assert_eq!(SqlValue::Int(7).bind_type(), BindType::Int);
        assert_eq!(SqlValue::Float(1.5).bind_type(), BindType::Double);
        assert_eq!(SqlValue::Blob(vec![1]).bind_type(), BindType::Blob);
        assert_eq!(SqlValue::Text("x".into()).bind_type(), BindType::String);
    }

    #[test]
    fn test_bind_type_chars() {
        let tags: String = [
            BindType::String,
            BindType::Int,
            BindType::Blob,
            BindType::Double,
        ]
        .iter()
        .map(|t| t.as_char())
        .collect();
        assert_eq!(tags, "sibd");
    }

    #[test]
    fn test_to_sql_value_conversions() {
        assert_eq!(true.to_sql_value(), SqlValue::Bool(true));
        assert_eq!(42_i32.to_sql_value(), SqlValue::Int(42));
        assert_eq!(2.5_f64.to_sql_value(), SqlValue::Float(2.5));
        assert_eq!(
            "hello".to_sql_value(),
            SqlValue::Text(String::from("hello"))
        );
        assert_eq!(None::<i32>.to_sql_value(), SqlValue::Null);
        assert_eq!(Some(42_i32).to_sql_value(), SqlValue::Int(42));
        assert_eq!(u64::MAX.to_sql_value(), SqlValue::Text(u64::MAX.to_string()));
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(SqlValue::from(serde_json::json!(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from(serde_json::json!(0.5)), SqlValue::Float(0.5));
        assert_eq!(SqlValue::from(serde_json::json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from(serde_json::json!("a")),
            SqlValue::Text("a".into())
        );
    }

    #[test]
    fn test_as_i64_accepts_numeric_text() {
        assert_eq!(SqlValue::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(SqlValue::Text("x".into()).as_i64(), None);
        assert_eq!(SqlValue::Bool(true).as_i64(), Some(1));
    }
}
