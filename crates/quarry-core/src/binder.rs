//! Positional parameter binding.
//!
//! [`Bindings`] keeps the bound values and their type tags index-aligned.
//! Values are appended in exactly the order their `?` placeholders appear
//! in the emitted SQL.

use crate::connection::Escape;
use crate::value::{BindType, SqlValue, ToSqlValue};

/// The placeholder token spliced into SQL text for every bound value.
pub const PLACEHOLDER: &str = "?";

/// An ordered list of bound values with a parallel list of type tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: Vec<SqlValue>,
    types: Vec<BindType>,
}

impl Bindings {
    /// Creates an empty binding list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: Vec::new(),
            types: Vec::new(),
        }
    }

    /// Appends a value and returns the placeholder to splice into SQL text.
    pub fn bind(&mut self, value: impl ToSqlValue) -> &'static str {
        let value = value.to_sql_value();
        self.types.push(value.bind_type());
        self.values.push(value);
        PLACEHOLDER
    }

    /// Binds every value in order and returns the comma-joined placeholders.
    pub fn bind_many<I, V>(&mut self, values: I) -> String
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        let placeholders: Vec<&str> = values.into_iter().map(|v| self.bind(v)).collect();
        placeholders.join(", ")
    }

    /// Appends all values of another binding list, preserving order.
    pub fn extend(&mut self, other: &Self) {
        self.values.extend(other.values.iter().cloned());
        self.types.extend(other.types.iter().copied());
    }

    /// Returns the bound values.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Returns the type tags, index-aligned with [`Bindings::values`].
    #[must_use]
    pub fn types(&self) -> &[BindType] {
        &self.types
    }

    /// Returns the type tags as the compact string used by client libraries.
    #[must_use]
    pub fn type_string(&self) -> String {
        self.types.iter().map(|t| t.as_char()).collect()
    }

    /// Number of bound values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when nothing has been bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Renders `sql` with every placeholder replaced by its bound value.
    ///
    /// String-tagged values are quoted through `escape`, blobs render as
    /// `[blob]`, everything else is emitted raw. Surplus placeholders are left
    /// as they are. Only used for logs and error context; the result is never
    /// executed.
    #[must_use]
    pub fn render_debug_sql(&self, sql: &str, escape: &dyn Escape) -> String {
        let mut out = String::with_capacity(sql.len() + self.values.len() * 8);
        let mut bound = self.values.iter().zip(self.types.iter());
        for ch in sql.chars() {
            if ch != '?' {
                out.push(ch);
                continue;
            }
            match bound.next() {
                Some((SqlValue::Null, _)) => out.push_str("NULL"),
                Some((value, BindType::String)) => {
                    out.push('\'');
                    out.push_str(&escape.escape_literal(&value.to_string()));
                    out.push('\'');
                }
                Some((_, BindType::Blob)) => out.push_str("[blob]"),
                Some((value, _)) => out.push_str(&value.to_string()),
                None => out.push(ch),
            }
        }
        out
    }
}

/// Counts `?` placeholders in builder-generated SQL.
#[must_use]
pub fn count_placeholders(sql: &str) -> usize {
    sql.matches(PLACEHOLDER).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MySqlEscape;

    #[test]
    fn test_bind_returns_placeholder_and_tags() {
        let mut b = Bindings::new();
        assert_eq!(b.bind("x"), "?");
        assert_eq!(b.bind(3), "?");
        assert_eq!(b.bind(1.5), "?");
        assert_eq!(b.bind(vec![0_u8, 1]), "?");
        assert_eq!(b.type_string(), "sidb");
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn test_bind_many_joins_placeholders() {
        let mut b = Bindings::new();
        assert_eq!(b.bind_many([1, 2, 3]), "?, ?, ?");
        assert_eq!(b.values(), &[SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]);
    }

    #[test]
    fn test_render_debug_sql_is_positional() {
        let mut b = Bindings::new();
        b.bind("O'Brien");
        b.bind(42);
        b.bind(SqlValue::Null);
        b.bind(vec![1_u8]);
        let sql = "SELECT * FROM t WHERE a = ? AND b = ? AND c <=> ? AND d = ?";
        assert_eq!(
            b.render_debug_sql(sql, &MySqlEscape),
            "SELECT * FROM t WHERE a = 'O\\'Brien' AND b = 42 AND c <=> NULL AND d = [blob]"
        );
        assert_eq!(count_placeholders(sql), b.len());
    }

    #[test]
    fn test_extend_keeps_order() {
        let mut a = Bindings::new();
        a.bind(1);
        let mut b = Bindings::new();
        b.bind("two");
        a.extend(&b);
        assert_eq!(a.values(), &[SqlValue::Int(1), SqlValue::Text("two".into())]);
        assert_eq!(a.type_string(), "is");
    }
}
