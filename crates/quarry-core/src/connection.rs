//! The execution primitive boundary.
//!
//! quarry never speaks a wire protocol itself. A [`Connection`] takes SQL
//! text plus positional [`Bindings`] and returns a [`QueryOutput`]; driver
//! crates (see `quarry-mysql`) implement it.

use crate::binder::Bindings;
use crate::error::DriverError;
use crate::value::Row;

/// Identifier and literal escaping.
///
/// Used for identifier fragments (table and column names) and for the debug
/// SQL renderer. Values are never escaped into executed SQL; they are bound.
pub trait Escape {
    /// Escapes a table or column name for use inside backticks.
    fn escape_identifier(&self, name: &str) -> String {
        name.replace('`', "``")
    }

    /// Escapes a string for use inside single quotes.
    fn escape_literal(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\x1a' => out.push_str("\\Z"),
                c => out.push(c),
            }
        }
        out
    }
}

/// MySQL escaping rules without a live connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEscape;

impl Escape for MySqlEscape {}

/// What the server returned for one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Rows changed by INSERT/UPDATE/DELETE/REPLACE.
    pub affected_rows: u64,
    /// Auto-increment id generated by the statement, 0 when none.
    pub insert_id: u64,
    /// Result rows for row-returning statements.
    pub rows: Vec<Row>,
}

impl QueryOutput {
    /// Output of a statement that changed `affected_rows` rows.
    #[must_use]
    pub const fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            insert_id: 0,
            rows: Vec::new(),
        }
    }

    /// Output of a row-returning statement.
    #[must_use]
    pub const fn rows(rows: Vec<Row>) -> Self {
        Self {
            affected_rows: 0,
            insert_id: 0,
            rows,
        }
    }

    /// Number of result rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

/// A prepared-statement execution primitive.
///
/// `execute` must apply `params` positionally against the `?` placeholders
/// in `sql`. It is called synchronously; the call blocks until the server
/// answers.
pub trait Connection: Escape {
    /// Executes one statement.
    fn execute(&mut self, sql: &str, params: &Bindings) -> Result<QueryOutput, DriverError>;

    /// The most recent connection-level error, if the driver tracks one.
    fn last_error(&self) -> Option<String> {
        None
    }
}

impl<C: Connection + ?Sized> Escape for &mut C {
    fn escape_identifier(&self, name: &str) -> String {
        (**self).escape_identifier(name)
    }

    fn escape_literal(&self, value: &str) -> String {
        (**self).escape_literal(value)
    }
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn execute(&mut self, sql: &str, params: &Bindings) -> Result<QueryOutput, DriverError> {
        (**self).execute(sql, params)
    }

    fn last_error(&self) -> Option<String> {
        (**self).last_error()
    }
}

/// Wraps an identifier in backticks, escaping each dotted segment.
///
/// `*` segments are left bare so `t.*` stays valid.
#[must_use]
pub fn quote_identifier(escape: &dyn Escape, name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part == "*" {
                String::from("*")
            } else {
                format!("`{}`", escape.escape_identifier(part))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
